//! Pluggable message serialization.
//!
//! The engine never commits to one body encoding. Everything that crosses the
//! wire — envelope records and the payload bytes inside them — goes through a
//! [`MessageCodec`], so applications can swap JSON for any serde-capable
//! format without touching framing or dispatch.

use serde::{de::DeserializeOwned, Serialize};

/// Errors from encoding or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Deserialization failed.
    #[error("decode failed: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Serializer collaborator: turns typed values into bytes and back.
///
/// Implementations must round-trip every payload type callers use, plus the
/// envelope record itself. They are shared with the background read loop, so
/// the bound is `Send + Sync`; implementations are expected to be cheap to
/// clone (stateless or `Arc`-backed).
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when the value cannot be serialized.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the bytes do not parse as `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// The provided default. Self-describing and easy to inspect on the wire;
/// applications that need a denser encoding plug in their own
/// [`MessageCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
