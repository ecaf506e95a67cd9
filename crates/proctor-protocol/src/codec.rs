//! Byte encoding for values kept in the durable store.
//!
//! The draft store only needs something that implements [`Codec`].
//! [`JsonCodec`] is the one we ship: a human can open the durable blob and
//! read the code inside it.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Turns values into bytes and back.
///
/// Codecs live inside the draft writer task, hence `Send + Sync + 'static`.
pub trait Codec: Send + Sync + 'static {
    /// # Errors
    /// [`ProtocolError::Encode`] if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// [`ProtocolError::Decode`] for truncated or mismatched bytes.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// JSON via `serde_json`. Requires the default `json` feature.
///
/// ## Example
///
/// ```rust
/// use proctor_protocol::{Codec, JsonCodec, SessionStatus};
///
/// let codec = JsonCodec;
///
/// let bytes = codec.encode(&SessionStatus::Fail).unwrap();
/// assert_eq!(bytes, br#""FAIL""#);
///
/// let decoded: SessionStatus = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, SessionStatus::Fail);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
