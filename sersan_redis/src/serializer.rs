//! Pluggable serialization of sessions into storage blobs.
use sersan::Session;

/// Turns sessions into the opaque bytes the store keeps, and back.
pub trait SessionSerializer: Send + Sync + std::fmt::Debug {
    /// Serialize a session into bytes.
    fn serialize(&self, sess: &Session) -> Result<Vec<u8>, anyhow::Error>;

    /// Deserialize a session from bytes produced by [`serialize`](Self::serialize).
    fn deserialize(&self, bytes: &[u8]) -> Result<Session, anyhow::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Structured JSON encoding.
///
/// Human-readable in `redis-cli`, at the cost of some size. Payload keys are
/// strings by construction, so every session encodes.
pub struct JsonSerializer;

impl SessionSerializer for JsonSerializer {
    fn serialize(&self, sess: &Session) -> Result<Vec<u8>, anyhow::Error> {
        Ok(serde_json::to_vec(sess)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Session, anyhow::Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Compact, self-describing binary encoding (MessagePack).
///
/// The blob carries its own structure, so arbitrary payload values round-trip
/// without any out-of-band schema.
pub struct MessagePackSerializer;

impl SessionSerializer for MessagePackSerializer {
    fn serialize(&self, sess: &Session) -> Result<Vec<u8>, anyhow::Error> {
        Ok(rmp_serde::to_vec(sess)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Session, anyhow::Error> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
