//! Draft types and the load-time merge.

use std::collections::BTreeMap;
use std::fmt;

use proctor_protocol::{QuestionId, SessionId, TestCaseId, TestOutcome};
use serde::{Deserialize, Serialize};

/// The participant's working copy of one question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    /// The code in the editor.
    pub code: String,
    /// Outcome of the most recent run of each test case.
    #[serde(default)]
    pub last_test_results: BTreeMap<TestCaseId, TestOutcome>,
}

impl QuestionDraft {
    /// A fresh draft holding the server's starter code.
    pub fn from_starter(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            last_test_results: BTreeMap::new(),
        }
    }
}

/// All drafts of one session, ordered by question.
pub type Drafts = BTreeMap<QuestionId, QuestionDraft>;

/// Key under which a session's drafts live in the durable store.
///
/// One key per session: all questions are stored together so a reload
/// restores them as one consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Builds the key `"{prefix}{session number}"`.
    pub fn new(prefix: &str, session_id: SessionId) -> Self {
        Self(format!("{prefix}{}", session_id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Merges starter code with drafts recovered from the durable store.
///
/// Every starter question appears in the result. Where a durable draft
/// exists for the same question it wins, test results included. Durable
/// drafts for questions the session no longer has are dropped.
pub fn merge_drafts(
    starters: impl IntoIterator<Item = (QuestionId, String)>,
    mut durable: Drafts,
) -> Drafts {
    starters
        .into_iter()
        .map(|(question, starter)| {
            let draft = durable
                .remove(&question)
                .unwrap_or_else(|| QuestionDraft::from_starter(starter));
            (question, draft)
        })
        .collect()
}
