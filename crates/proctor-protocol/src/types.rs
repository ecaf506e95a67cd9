//! Core protocol types: what the server tells us about a session.
//!
//! Every type here is something that comes back from (or goes to) the
//! assessment server. The JSON field names are camelCase because that's
//! what the portal's API speaks; the Rust names stay snake_case.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A server-assigned session identifier.
///
/// Newtype wrapper so a `SessionId` can't be passed where a `QuestionId`
/// is expected, even though both are `u64` underneath.
/// `#[serde(transparent)]` keeps the JSON form a plain number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Identifies one question within an assessment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct QuestionId(pub u64);

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q-{}", self.0)
    }
}

/// Identifies one test case of a question.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TestCaseId(pub u64);

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// The server's status label for a session.
///
/// Only `IN_PROGRESS` is meaningful to the lifecycle subsystem; every
/// other label is terminal. Labels we don't know are kept verbatim in
/// [`SessionStatus::Other`] so they can be shown to the participant.
///
/// Serialized as the bare label string (`"IN_PROGRESS"`, `"PASS"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SessionStatus {
    InProgress,
    Pass,
    Fail,
    /// Any other terminal label (e.g. `"TERMINATED"`, `"ABSENT"`).
    Other(String),
}

impl SessionStatus {
    /// Parses a server label.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] for an empty label.
    pub fn parse(label: &str) -> Result<Self, ProtocolError> {
        match label.trim() {
            "" => Err(ProtocolError::InvalidMessage(
                "session status label is empty".into(),
            )),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            other => Ok(Self::Other(other.to_string())),
        }
    }

    /// The label as the server spells it.
    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Other(label) => label,
        }
    }

    /// Returns `true` for every status except `IN_PROGRESS`.
    ///
    /// Terminal statuses never revert for the same session id.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = ProtocolError;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        Self::parse(&label)
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SessionMeta
// ---------------------------------------------------------------------------

/// The server's record of one test session.
///
/// Fetched once at load and replaced wholesale by fresher copies from the
/// reconciliation poll. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session_id: SessionId,
    /// When the participant started the session.
    pub started_at: DateTime<Utc>,
    /// Granted duration. Administrators may change it mid-session.
    /// `None` (or zero) means the session is untimed.
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    /// Hard cutoff of the time slot containing this session.
    #[serde(default)]
    pub schedule_end_at: Option<DateTime<Utc>>,
    /// Some session kinds are exempt from the slot cutoff.
    #[serde(default)]
    pub ignore_schedule_end: bool,
    pub status: SessionStatus,
}

impl SessionMeta {
    /// Returns `true` once the server has concluded the session.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The granted duration, or `None` for untimed sessions.
    pub fn duration(&self) -> Option<ChronoDuration> {
        match self.duration_minutes {
            Some(minutes) if minutes > 0 => {
                Some(ChronoDuration::minutes(i64::from(minutes)))
            }
            _ => None,
        }
    }

    /// Returns `true` if any field that feeds the deadline differs.
    pub fn timing_differs(&self, other: &SessionMeta) -> bool {
        self.started_at != other.started_at
            || self.duration_minutes != other.duration_minutes
            || self.schedule_end_at != other.schedule_end_at
            || self.ignore_schedule_end != other.ignore_schedule_end
    }
}

/// Response of the session fetch and the session-meta poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: SessionMeta,
    /// The server's clock when it produced this response.
    pub server_now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Finish and execution reports
// ---------------------------------------------------------------------------

/// Optional grading summary attached to a finish response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishSummary {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of the finish operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishReport {
    pub status: SessionStatus,
    #[serde(default)]
    pub server_now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: FinishSummary,
}

/// Result of one test case run by the execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    /// Compile error, runtime error, or time limit.
    Errored,
}

impl TestOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Response of the execution operation for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub question_id: QuestionId,
    pub results: BTreeMap<TestCaseId, TestOutcome>,
    #[serde(default)]
    pub server_now: Option<DateTime<Utc>>,
}
