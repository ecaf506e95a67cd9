//! The server-access hook.
//!
//! Proctor doesn't speak HTTP itself. The host application implements
//! [`SessionClient`] with whatever transport it already has, and the
//! lifecycle calls it at the right moments. Tests implement it with a
//! scripted mock.

use std::future::Future;

use proctor_protocol::{
    ExecutionReport, FinishReport, QuestionId, SessionId, SessionSnapshot,
};

use crate::ClientError;

/// Calls the assessment server on behalf of one participant.
///
/// `Send + Sync + 'static` because the client is shared (through an
/// `Arc`) between the session actor and the finalize task.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use proctor_protocol::{
///     ExecutionReport, FinishReport, FinishSummary, QuestionId, SessionId,
///     SessionMeta, SessionSnapshot, SessionStatus,
/// };
/// use proctor_session::{ClientError, SessionClient};
///
/// /// A server where every session is already over.
/// struct ClosedServer;
///
/// impl SessionClient for ClosedServer {
///     async fn fetch_session(&self, id: SessionId) -> Result<SessionSnapshot, ClientError> {
///         Ok(SessionSnapshot {
///             session: SessionMeta {
///                 session_id: id,
///                 started_at: Utc::now(),
///                 duration_minutes: None,
///                 schedule_end_at: None,
///                 ignore_schedule_end: false,
///                 status: SessionStatus::Fail,
///             },
///             server_now: Utc::now(),
///         })
///     }
///
///     async fn finish_session(&self, _id: SessionId) -> Result<FinishReport, ClientError> {
///         Ok(FinishReport {
///             status: SessionStatus::Fail,
///             server_now: None,
///             summary: FinishSummary::default(),
///         })
///     }
///
///     async fn execute(
///         &self,
///         _id: SessionId,
///         _question: QuestionId,
///         _code: String,
///     ) -> Result<ExecutionReport, ClientError> {
///         Err(ClientError::Server { code: 409, message: "session closed".into() })
///     }
/// }
/// ```
pub trait SessionClient: Send + Sync + 'static {
    /// Fetches the session and the server's current time. Used at load
    /// and right before finalizing.
    fn fetch_session(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<SessionSnapshot, ClientError>> + Send;

    /// The periodic status poll. Same shape as
    /// [`fetch_session`](Self::fetch_session), which it calls unless the
    /// server has a lighter endpoint for it.
    fn poll_session(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<SessionSnapshot, ClientError>> + Send {
        self.fetch_session(id)
    }

    /// Asks the server to conclude the session.
    ///
    /// Must be idempotent server-side: it may be called after the server
    /// already finished the session by another path.
    fn finish_session(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<FinishReport, ClientError>> + Send;

    /// Runs `code` against the question's test cases.
    fn execute(
        &self,
        id: SessionId,
        question: QuestionId,
        code: String,
    ) -> impl Future<Output = Result<ExecutionReport, ClientError>> + Send;
}
