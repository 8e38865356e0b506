//! Encoding of session identifiers into tamper-evident cookie values.
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::SessionId;

type HmacSha256 = Hmac<Sha256>;

/// Encodes a session ID into the cookie value sent to the client, and decodes
/// it back on the next request.
///
/// Any decode failure — tampering, truncation, a signature from a key that
/// was rotated out — is equivalent to "no cookie": the request proceeds as an
/// unauthenticated one.
pub trait SessionCodec: Send + Sync + std::fmt::Debug {
    /// Encode the session ID for transport inside a cookie.
    fn encode(&self, id: &SessionId) -> Result<String, EncodeError>;

    /// Decode a cookie value back into a session ID.
    fn decode(&self, value: &str) -> Option<SessionId>;
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
/// The error returned by [`SessionCodec::encode`].
pub enum EncodeError {
    /// The codec has no key to sign with.
    #[error("no signing key is configured")]
    NoKeys,
}

#[derive(Clone)]
/// HMAC-SHA256 signing codec with ordered key rotation.
///
/// The cookie value format is `<session id>.<hex-encoded mac>`. The first key
/// signs outgoing cookies; every key is tried, in order, when verifying
/// incoming ones, so sessions signed before a key rotation stay alive until
/// the old key is dropped from the list.
pub struct SignedCodec {
    keys: Vec<Vec<u8>>,
}

impl std::fmt::Debug for SignedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedCodec")
            .field("keys", &format_args!("<{} key(s)>", self.keys.len()))
            .finish()
    }
}

impl SignedCodec {
    /// Create a codec from signing keys, most recent first.
    pub fn new(keys: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

fn mac(key: &[u8], message: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any size");
    mac.update(message);
    mac
}

impl SessionCodec for SignedCodec {
    fn encode(&self, id: &SessionId) -> Result<String, EncodeError> {
        let key = self.keys.first().ok_or(EncodeError::NoKeys)?;
        let id = id.to_string();
        let tag = mac(key, id.as_bytes()).finalize().into_bytes();
        Ok(format!("{id}.{}", hex::encode(tag)))
    }

    fn decode(&self, value: &str) -> Option<SessionId> {
        let (id, tag_hex) = value.rsplit_once('.')?;
        let tag = hex::decode(tag_hex).ok()?;
        for key in &self.keys {
            if mac(key, id.as_bytes()).verify_slice(&tag).is_ok() {
                return id.parse().ok();
            }
        }
        tracing::warn!(
            cookie.prefix = %value.chars().take(8).collect::<String>(),
            "session cookie failed signature verification"
        );
        None
    }
}
