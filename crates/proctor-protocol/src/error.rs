//! Error types for the protocol layer.
//!
//! Each crate in Proctor defines its own error enum. When you see a
//! `ProtocolError`, the problem is in decoding what the server (or the
//! durable store) handed back, not in timing or lifecycle logic.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: a truncated blob in the durable store, or a
    /// server response missing a required field.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The value decoded but violates a protocol rule, e.g. an empty
    /// status label.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
