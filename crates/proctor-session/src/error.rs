//! Error types for the session layer.

use proctor_protocol::SessionId;

/// A failed call to the assessment server.
///
/// Every variant is treated as transient by the lifecycle: polls are
/// retried on the next tick, the finalize step is retried with backoff.
/// None of them is evidence that a session has ended.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The request never got an answer (DNS, connect, timeout, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error status.
    #[error("server returned {code}: {message}")]
    Server { code: u16, message: String },

    /// The server answered, but not with something we could use.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors surfaced by the lifecycle coordinator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// A server call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Every attempt of one finalize round failed. The session stays
    /// `FinishPending` (it never goes back to `Running`) and the round
    /// can be resumed with
    /// [`resume_finalize`](crate::LifecycleCoordinator::resume_finalize).
    #[error("finalizing session {session_id} stalled after {attempts} attempts: {last}")]
    FinalizeStalled {
        session_id: SessionId,
        attempts: u32,
        last: ClientError,
    },
}
