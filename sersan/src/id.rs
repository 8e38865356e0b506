use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;

#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
/// The identifier for a session: 32 bytes drawn from the operating system's
/// CSPRNG.
///
/// Whenever the identifier travels as text — cookie values, storage keys,
/// logs — it is rendered as base32 without padding: exactly 52 ASCII
/// characters.
pub struct SessionId([u8; 32]);

impl SessionId {
    /// Generate a new random identifier.
    pub fn random() -> Self {
        use rand::Rng as _;
        Self(rand::thread_rng().gen())
    }

    /// The raw bytes of the identifier.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE32_NOPAD.encode(&self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid session id: expected 52 unpadded base32 characters")]
/// The error returned when parsing a malformed session identifier.
pub struct ParseSessionIdError(());

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| ParseSessionIdError(()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| ParseSessionIdError(()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for SessionId {
    type Error = ParseSessionIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}
