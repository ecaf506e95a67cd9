//! Per-question test outcomes and the running session verdict.

use std::collections::BTreeMap;

use proctor_protocol::{ExecutionReport, QuestionId, SessionStatus, TestCaseId, TestOutcome};
use tracing::debug;

/// How the session stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionVerdict {
    /// Still running. Counts reflect the latest run of every test case.
    Pending {
        questions_passed: usize,
        questions_total: usize,
        cases_passed: usize,
        cases_run: usize,
    },
    /// The lifecycle finished with this status.
    Concluded(SessionStatus),
}

/// Tracks what the participant's test runs produced.
///
/// Consumes the coordinator's terminal state through
/// [`conclude`](Self::conclude); after that the outcomes are frozen.
#[derive(Debug, Clone, Default)]
pub struct SubmissionTracker {
    outcomes: BTreeMap<QuestionId, BTreeMap<TestCaseId, TestOutcome>>,
    concluded: Option<SessionStatus>,
}

impl SubmissionTracker {
    /// Tracks `questions`, none of which has run yet.
    pub fn new(questions: impl IntoIterator<Item = QuestionId>) -> Self {
        Self {
            outcomes: questions.into_iter().map(|q| (q, BTreeMap::new())).collect(),
            concluded: None,
        }
    }

    /// Restores outcomes recovered with the drafts.
    pub fn seed(&mut self, question: QuestionId, outcomes: &BTreeMap<TestCaseId, TestOutcome>) {
        self.outcomes
            .entry(question)
            .or_default()
            .extend(outcomes.iter().map(|(k, v)| (*k, *v)));
    }

    /// Records an execution report. Returns `false` (and records nothing)
    /// once concluded.
    pub fn record(&mut self, report: &ExecutionReport) -> bool {
        if self.concluded.is_some() {
            debug!(question = %report.question_id, "session concluded, ignoring execution report");
            return false;
        }
        self.outcomes
            .entry(report.question_id)
            .or_default()
            .extend(report.results.iter().map(|(k, v)| (*k, *v)));
        true
    }

    /// Latest outcome of each test case of `question`.
    pub fn outcomes(&self, question: QuestionId) -> Option<&BTreeMap<TestCaseId, TestOutcome>> {
        self.outcomes.get(&question)
    }

    /// `true` if `question` has run and every test case passed.
    pub fn question_passed(&self, question: QuestionId) -> bool {
        self.outcomes
            .get(&question)
            .is_some_and(|cases| !cases.is_empty() && cases.values().all(TestOutcome::is_pass))
    }

    /// Freezes the tracker with the lifecycle's terminal status. Only the
    /// first call counts.
    pub fn conclude(&mut self, status: SessionStatus) {
        if self.concluded.is_none() {
            self.concluded = Some(status);
        }
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded.is_some()
    }

    /// The running verdict, or the final status once concluded.
    pub fn verdict(&self) -> SessionVerdict {
        if let Some(status) = &self.concluded {
            return SessionVerdict::Concluded(status.clone());
        }
        let questions_passed = self
            .outcomes
            .keys()
            .filter(|q| self.question_passed(**q))
            .count();
        let (cases_passed, cases_run) = self
            .outcomes
            .values()
            .flat_map(BTreeMap::values)
            .fold((0, 0), |(passed, run), outcome| {
                (passed + usize::from(outcome.is_pass()), run + 1)
            });
        SessionVerdict::Pending {
            questions_passed,
            questions_total: self.outcomes.len(),
            cases_passed,
            cases_run,
        }
    }
}
