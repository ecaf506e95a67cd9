//! Error types for the session runtime.

use proctor_protocol::{QuestionId, SessionId};
use proctor_session::{ClientError, SessionError};

/// Errors returned through a [`SessionHandle`](crate::SessionHandle).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// The session actor has shut down (or its channel is full).
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),

    /// The operation needs a running session, e.g. editing code after
    /// the session finished.
    #[error("session {session_id} is not running (state: {state})")]
    NotRunning { session_id: SessionId, state: String },

    /// The question isn't part of this session.
    #[error("question {0} is not part of this session")]
    UnknownQuestion(QuestionId),

    /// Finishing the session failed; it stays pending and is retried.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A server call made on the participant's behalf failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}
