use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use proctor::prelude::*;

// ---------------------------------------------------------------------------
// In-memory portal
// ---------------------------------------------------------------------------

/// Stands in for the assessment server. Its clock runs 3 seconds behind
/// the local one, so the countdown has drift to correct.
#[derive(Clone)]
struct MockPortal {
    session: Arc<Mutex<SessionMeta>>,
}

impl MockPortal {
    fn new(session_id: SessionId) -> Self {
        Self {
            session: Arc::new(Mutex::new(SessionMeta {
                session_id,
                started_at: Utc::now(),
                duration_minutes: Some(1),
                schedule_end_at: None,
                ignore_schedule_end: false,
                status: SessionStatus::InProgress,
            })),
        }
    }

    fn server_now() -> chrono::DateTime<Utc> {
        Utc::now() - TimeDelta::seconds(3)
    }

    fn meta(&self) -> Result<std::sync::MutexGuard<'_, SessionMeta>, ClientError> {
        self.session
            .lock()
            .map_err(|_| ClientError::Malformed("portal state poisoned".into()))
    }

    /// What an administrator would do from the back office.
    fn extend_to(&self, minutes: u32) -> Result<(), ClientError> {
        self.meta()?.duration_minutes = Some(minutes);
        Ok(())
    }
}

impl SessionClient for MockPortal {
    async fn fetch_session(&self, _id: SessionId) -> Result<SessionSnapshot, ClientError> {
        Ok(SessionSnapshot {
            session: self.meta()?.clone(),
            server_now: Self::server_now(),
        })
    }

    async fn finish_session(&self, _id: SessionId) -> Result<FinishReport, ClientError> {
        let status = {
            let mut meta = self.meta()?;
            if !meta.status.is_terminal() {
                meta.status = SessionStatus::Pass;
            }
            meta.status.clone()
        };
        Ok(FinishReport {
            status,
            server_now: Some(Self::server_now()),
            summary: FinishSummary {
                score: Some(2.0),
                max_score: Some(3.0),
                message: None,
            },
        })
    }

    async fn execute(
        &self,
        _id: SessionId,
        question: QuestionId,
        code: String,
    ) -> Result<ExecutionReport, ClientError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let verdict = if code.contains("a + b") {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed
        };
        let results: BTreeMap<_, _> = (1..=3).map(|t| (TestCaseId(t), verdict)).collect();
        Ok(ExecutionReport {
            question_id: question,
            results,
            server_now: Some(Self::server_now()),
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted participant
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let session_id = SessionId(1);
    let portal = MockPortal::new(session_id);
    let admin = portal.clone();

    let proctor = Proctor::<MockPortal, MemoryStore>::builder()
        .poll_interval(Duration::from_secs(5))
        .on_finished(|v: &Verdict| eprintln!("verdict: {} ({})", v.status, v.reason))
        .build(portal, MemoryStore::new());

    let starters = vec![(
        QuestionId(1),
        "fn add(a: i32, b: i32) -> i32 { todo!() }".to_string(),
    )];
    let session = proctor.load(session_id, starters).await?;

    // Countdown display.
    let mut remaining = session.subscribe_remaining();
    tokio::spawn(async move {
        while remaining.changed().await.is_ok() {
            if let Some(left) = *remaining.borrow_and_update() {
                eprintln!("time left: {}", format_remaining(left));
            }
        }
    });

    let report = session.run_tests(QuestionId(1)).await?;
    eprintln!("first run: {:?}", report.results);

    session
        .edit_code(QuestionId(1), "fn add(a: i32, b: i32) -> i32 { a + b }")
        .await?;
    let report = session.run_tests(QuestionId(1)).await?;
    eprintln!("second run: {:?}", report.results);

    tokio::time::sleep(Duration::from_secs(6)).await;
    admin.extend_to(2)?;
    eprintln!("admin extended the session to 2 minutes");
    let reconciliation = session.refresh().await?;
    eprintln!("refresh: {reconciliation:?}");

    tokio::time::sleep(Duration::from_secs(4)).await;
    let info = session.info().await?;
    eprintln!(
        "clock offset {}ms, progress {:?}",
        info.clock_offset.num_milliseconds(),
        info.verdict
    );

    let verdict = session.submit().await?;
    let summary = verdict.summary.unwrap_or_default();
    eprintln!(
        "submitted: {} score {:?}/{:?}",
        verdict.status, summary.score, summary.max_score
    );

    session.shutdown().await?;
    Ok(())
}
