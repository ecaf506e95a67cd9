//! Lifecycle types: states, finish reasons, and the final verdict.

use std::fmt;

use chrono::{DateTime, Utc};
use proctor_protocol::{FinishSummary, SessionStatus};

// ---------------------------------------------------------------------------
// FinishReason
// ---------------------------------------------------------------------------

/// Why a finish was requested.
///
/// Three independent producers exist and any of them can fire first:
///
/// - the countdown reaching zero ([`Expired`](Self::Expired)),
/// - the poller seeing a terminal status ([`TerminalStatus`](Self::TerminalStatus)),
/// - the participant pressing "finish" ([`UserRequested`](Self::UserRequested)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Expired,
    /// The server already concluded the session. The status is
    /// authoritative; no further server call is needed.
    TerminalStatus(SessionStatus),
    UserRequested,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::TerminalStatus(status) => write!(f, "terminal status {status}"),
            Self::UserRequested => write!(f, "user requested"),
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// How a session ended. Delivered to observers exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Terminal status reported by the server.
    pub status: SessionStatus,
    /// The request that won the race to finish the session.
    pub reason: FinishReason,
    /// Grading summary, when the finish operation returned one.
    pub summary: Option<FinishSummary>,
    /// Server-time estimate of when the session was concluded locally.
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// State of a session's lifecycle.
///
/// ```text
///   Running ──request_finish()──→ FinishPending ──finalized──→ Finished
/// ```
///
/// Transitions only move forward. A failed finalize leaves the session
/// `FinishPending`; it never resumes `Running` once expiry was observed.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    Running,
    /// A finish attempt is in flight (or stalled and awaiting resume).
    FinishPending { reason: FinishReason },
    Finished(Verdict),
}

impl LifecycleState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// The verdict, once finished.
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Finished(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::FinishPending { .. } => write!(f, "FinishPending"),
            Self::Finished(v) => write!(f, "Finished({})", v.status),
        }
    }
}

// ---------------------------------------------------------------------------
// FinishOutcome
// ---------------------------------------------------------------------------

/// What one call to `request_finish` did.
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    /// This call drove the session to `Finished`.
    Finished(Verdict),
    /// Another request got there first; nothing happened. Carries the
    /// state at the time of the call.
    Ignored(LifecycleState),
}

// ---------------------------------------------------------------------------
// FinishObserver
// ---------------------------------------------------------------------------

/// Receives the verdict when a session finishes.
///
/// Called exactly once per session, from whichever task completed the
/// finish. Keep it quick: it runs before the coordinator returns.
///
/// Any `Fn(&Verdict) + Send + Sync + 'static` closure is an observer.
pub trait FinishObserver: Send + Sync + 'static {
    fn on_finished(&self, verdict: &Verdict);
}

impl<F> FinishObserver for F
where
    F: Fn(&Verdict) + Send + Sync + 'static,
{
    fn on_finished(&self, verdict: &Verdict) {
        self(verdict)
    }
}
