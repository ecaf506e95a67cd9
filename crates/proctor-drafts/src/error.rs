//! Error types for draft persistence.

use proctor_protocol::ProtocolError;

/// Errors that can occur while reading or writing drafts.
///
/// None of these reach the participant: the draft store logs them and
/// carries on with what it has in memory.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    /// The backing store failed (disk full, permissions, ...).
    #[error("draft storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored blob couldn't be decoded, or drafts couldn't be encoded.
    #[error("draft blob unreadable: {0}")]
    Codec(#[from] ProtocolError),

    /// The write-behind task is gone (runtime shutting down).
    #[error("draft writer for {0} has stopped")]
    WriterClosed(String),
}
