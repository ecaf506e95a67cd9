//! Integration tests for the session actor against an in-memory server.
//!
//! All tests run on paused Tokio time, so a 60-minute session takes
//! milliseconds and every tick lands exactly on its second.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proctor_drafts::{DraftStore, DurableStore, MemoryStore, SessionKey};
use proctor_protocol::{
    ExecutionReport, FinishReport, FinishSummary, QuestionId, SessionId, SessionMeta,
    SessionSnapshot, SessionStatus, TestCaseId, TestOutcome,
};
use proctor_runtime::{
    spawn_session, Reconciliation, RuntimeConfig, RuntimeError, SessionHandle, SessionVerdict,
};
use proctor_session::{
    ClientError, FinishObserver, FinishReason, LifecycleState, RetryPolicy, SessionClient,
    Verdict,
};
use proctor_tick::{format_remaining, Clock, ClockOffsetTracker, CountdownState, SystemClock};

// =========================================================================
// Fake server
// =========================================================================

const SID: SessionId = SessionId(11);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn minutes(m: i64) -> TimeDelta {
    TimeDelta::minutes(m)
}

/// A server that keeps one session and answers from the same (paused)
/// clock the client uses, so the clock offset is zero.
struct FakeServer {
    clock: SystemClock,
    meta: Mutex<SessionMeta>,
    fail_polls: AtomicBool,
    /// Number of upcoming finish calls that fail.
    finish_failures: AtomicUsize,
    poll_calls: AtomicUsize,
    finish_calls: AtomicUsize,
}

impl FakeServer {
    fn new(duration_minutes: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            clock: SystemClock::anchored_at(t0()),
            meta: Mutex::new(SessionMeta {
                session_id: SID,
                started_at: t0(),
                duration_minutes,
                schedule_end_at: None,
                ignore_schedule_end: false,
                status: SessionStatus::InProgress,
            }),
            fail_polls: AtomicBool::new(false),
            finish_failures: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            finish_calls: AtomicUsize::new(0),
        })
    }

    /// An administrator changes the granted duration.
    fn set_duration(&self, minutes: u32) {
        self.meta.lock().unwrap().duration_minutes = Some(minutes);
    }

    /// An administrator concludes the session.
    fn set_status(&self, status: SessionStatus) {
        self.meta.lock().unwrap().status = status;
    }

    fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.meta.lock().unwrap().clone(),
            server_now: self.clock.now(),
        }
    }
}

impl SessionClient for FakeServer {
    async fn fetch_session(&self, _id: SessionId) -> Result<SessionSnapshot, ClientError> {
        Ok(self.snapshot())
    }

    async fn poll_session(&self, _id: SessionId) -> Result<SessionSnapshot, ClientError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(ClientError::Network("gateway timeout".into()));
        }
        Ok(self.snapshot())
    }

    async fn finish_session(&self, _id: SessionId) -> Result<FinishReport, ClientError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .finish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::Server {
                code: 503,
                message: "unavailable".into(),
            });
        }
        let status = {
            let mut meta = self.meta.lock().unwrap();
            if !meta.status.is_terminal() {
                meta.status = SessionStatus::Fail;
            }
            meta.status.clone()
        };
        Ok(FinishReport {
            status,
            server_now: Some(self.clock.now()),
            summary: FinishSummary::default(),
        })
    }

    async fn execute(
        &self,
        _id: SessionId,
        question: QuestionId,
        code: String,
    ) -> Result<ExecutionReport, ClientError> {
        let second = if code.contains("solution") {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed
        };
        Ok(ExecutionReport {
            question_id: question,
            results: BTreeMap::from([
                (TestCaseId(1), TestOutcome::Passed),
                (TestCaseId(2), second),
            ]),
            server_now: Some(self.clock.now()),
        })
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn starters() -> Vec<(QuestionId, String)> {
    vec![
        (QuestionId(1), "starter".to_string()),
        (QuestionId(2), "starter".to_string()),
    ]
}

fn key(config: &RuntimeConfig) -> SessionKey {
    SessionKey::new(&config.draft_key_prefix, SID)
}

/// Loads the session the way a host application would.
async fn load(
    server: &Arc<FakeServer>,
    store: &Arc<MemoryStore>,
    config: RuntimeConfig,
    observers: Vec<Arc<dyn FinishObserver>>,
) -> SessionHandle {
    let snapshot = server.fetch_session(SID).await.unwrap();
    let tracker = ClockOffsetTracker::new(SystemClock::anchored_at(t0()));
    tracker.observe(snapshot.server_now);
    let drafts = DraftStore::load(Arc::clone(store), key(&config), starters()).await;
    spawn_session(
        Arc::clone(server),
        snapshot,
        tracker,
        drafts,
        config,
        observers,
    )
}

/// An observer that records every verdict it is handed.
fn recorder() -> (Arc<dyn FinishObserver>, Arc<Mutex<Vec<Verdict>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: Arc<dyn FinishObserver> =
        Arc::new(move |v: &Verdict| sink.lock().unwrap().push(v.clone()));
    (observer, seen)
}

/// Lets every ready task run before time moves on.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_sixty_minute_session_expires_and_finishes_fail() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let (observer, seen) = recorder();
    let handle = load(&server, &store, RuntimeConfig::default(), vec![observer]).await;

    tokio::time::sleep(Duration::from_secs(59 * 60)).await;
    let info = handle.info().await.unwrap();
    assert_eq!(info.countdown, CountdownState::Ticking);
    assert_eq!(format_remaining(info.remaining.unwrap()), "01:00");

    let verdict = handle.wait_finished().await.unwrap();
    assert_eq!(verdict.status, SessionStatus::Fail);
    assert_eq!(verdict.reason, FinishReason::Expired);
    assert_eq!(verdict.finished_at, t0() + minutes(60));
    assert_eq!(server.finish_calls(), 1);

    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1, "notified exactly once");
    let info = handle.info().await.unwrap();
    assert_eq!(info.countdown, CountdownState::Stopped);
    assert_eq!(info.verdict, SessionVerdict::Concluded(SessionStatus::Fail));
    assert!(store.is_empty(), "drafts cleared after finish");
}

#[tokio::test(start_paused = true)]
async fn test_admin_extension_is_picked_up_by_the_poller() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let handle = load(&server, &store, RuntimeConfig::default(), vec![]).await;

    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    server.set_duration(90);

    // Up to one poll interval later, then on to T0+60:00.
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;

    let info = handle.info().await.unwrap();
    assert!(info.lifecycle.is_running());
    assert_eq!(info.deadline, Some(t0() + minutes(90)));
    assert_eq!(info.remaining, Some(Duration::from_secs(30 * 60)));
    assert_eq!(format_remaining(info.remaining.unwrap()), "30:00");
    // The published value lags by at most the tick that is due right now.
    let published = handle.subscribe_remaining().borrow().unwrap();
    assert!(published >= Duration::from_secs(30 * 60), "{published:?}");
    assert!(published <= Duration::from_secs(30 * 60 + 1), "{published:?}");
}

#[tokio::test(start_paused = true)]
async fn test_refresh_reseeds_immediately() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let handle = load(&server, &store, RuntimeConfig::default(), vec![]).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.refresh().await.unwrap(), Reconciliation::Unchanged);

    server.set_duration(75);
    assert_eq!(
        handle.refresh().await.unwrap(),
        Reconciliation::Reseed(Some(t0() + minutes(75)))
    );
    let info = handle.info().await.unwrap();
    assert_eq!(info.remaining, Some(Duration::from_secs(75 * 60 - 10)));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_status_short_circuits_without_finish_call() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let (observer, seen) = recorder();
    let handle = load(&server, &store, RuntimeConfig::default(), vec![observer]).await;

    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    server.set_status(SessionStatus::Fail);

    let verdict = handle.wait_finished().await.unwrap();
    assert_eq!(verdict.status, SessionStatus::Fail);
    assert_eq!(
        verdict.reason,
        FinishReason::TerminalStatus(SessionStatus::Fail)
    );
    assert!(verdict.finished_at <= t0() + minutes(10) + TimeDelta::seconds(30));
    assert_eq!(server.finish_calls(), 0);

    settle().await;
    let info = handle.info().await.unwrap();
    assert_eq!(info.countdown, CountdownState::Stopped);
    assert_eq!(info.remaining, None);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_concluded_before_load_finishes_at_once() {
    let server = FakeServer::new(Some(60));
    server.set_status(SessionStatus::Pass);
    let store = Arc::new(MemoryStore::new());

    let handle = load(&server, &store, RuntimeConfig::default(), vec![]).await;
    let verdict = handle.wait_finished().await.unwrap();

    assert_eq!(verdict.status, SessionStatus::Pass);
    assert_eq!(verdict.finished_at, t0());
    assert_eq!(server.finish_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_submit_twice_finishes_once() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let (observer, seen) = recorder();
    let handle = load(&server, &store, RuntimeConfig::default(), vec![observer]).await;

    let (first, second) = tokio::join!(handle.submit(), handle.submit());

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.reason, FinishReason::UserRequested);
    assert_eq!(server.finish_calls(), 1);

    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_tests_records_outcomes_while_running_only() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let handle = load(&server, &store, RuntimeConfig::default(), vec![]).await;

    handle.edit_code(QuestionId(1), "my solution").await.unwrap();
    handle.run_tests(QuestionId(2)).await.unwrap();
    let report = handle.run_tests(QuestionId(1)).await.unwrap();
    assert!(report.results.values().all(TestOutcome::is_pass));

    let info = handle.info().await.unwrap();
    assert_eq!(
        info.verdict,
        SessionVerdict::Pending {
            questions_passed: 1,
            questions_total: 2,
            cases_passed: 3,
            cases_run: 4,
        }
    );
    let drafts = handle.drafts().await.unwrap();
    assert_eq!(drafts[&QuestionId(1)].code, "my solution");
    assert_eq!(drafts[&QuestionId(1)].last_test_results.len(), 2);

    handle.submit().await.unwrap();
    settle().await;

    assert!(matches!(
        handle.edit_code(QuestionId(1), "too late").await,
        Err(RuntimeError::NotRunning { .. })
    ));
    assert!(matches!(
        handle.run_tests(QuestionId(1)).await,
        Err(RuntimeError::NotRunning { .. })
    ));
    assert_eq!(
        handle.info().await.unwrap().verdict,
        SessionVerdict::Concluded(SessionStatus::Fail)
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_question_is_rejected() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let handle = load(&server, &store, RuntimeConfig::default(), vec![]).await;

    assert!(matches!(
        handle.edit_code(QuestionId(99), "x").await,
        Err(RuntimeError::UnknownQuestion(QuestionId(99)))
    ));
    assert!(matches!(
        handle.run_tests(QuestionId(99)).await,
        Err(RuntimeError::UnknownQuestion(QuestionId(99)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_untimed_session_never_starts_countdown() {
    let server = FakeServer::new(None);
    let store = Arc::new(MemoryStore::new());
    let handle = load(&server, &store, RuntimeConfig::default(), vec![]).await;

    tokio::time::sleep(Duration::from_secs(3 * 60 * 60)).await;

    let info = handle.info().await.unwrap();
    assert_eq!(info.countdown, CountdownState::Stopped);
    assert_eq!(info.remaining, None);
    assert_eq!(info.deadline, None);
    assert!(info.lifecycle.is_running());

    let verdict = handle.submit().await.unwrap();
    assert_eq!(verdict.status, SessionStatus::Fail);
}

#[tokio::test(start_paused = true)]
async fn test_failed_polls_never_finish_the_session() {
    let server = FakeServer::new(Some(60));
    server.fail_polls.store(true, Ordering::SeqCst);
    let store = Arc::new(MemoryStore::new());
    let handle = load(&server, &store, RuntimeConfig::default(), vec![]).await;

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;

    let info = handle.info().await.unwrap();
    assert!(info.lifecycle.is_running());
    assert_eq!(info.poll_failures, 10);
    assert_eq!(info.polls, 0);
    assert!(matches!(handle.refresh().await, Err(RuntimeError::Client(_))));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_finalize_resumes_on_poll_ticks() {
    let server = FakeServer::new(Some(60));
    server.finish_failures.store(5, Ordering::SeqCst);
    let store = Arc::new(MemoryStore::new());
    let config = RuntimeConfig {
        // Off the minute grid so poll ticks never coincide with expiry.
        poll_interval: Duration::from_secs(7),
        retry: RetryPolicy::immediate(2),
        ..RuntimeConfig::default()
    };
    let (observer, seen) = recorder();
    let handle = load(&server, &store, config, vec![observer]).await;

    tokio::time::sleep(Duration::from_secs(3601)).await;
    assert!(matches!(
        handle.state(),
        LifecycleState::FinishPending {
            reason: FinishReason::Expired
        }
    ));

    // 3600 stalls (2 failures), 3605 stalls (2 more), 3612 succeeds.
    let verdict = handle.wait_finished().await.unwrap();
    assert_eq!(verdict.finished_at, t0() + TimeDelta::seconds(3612));
    assert_eq!(verdict.reason, FinishReason::Expired);
    assert_eq!(server.finish_calls(), 6);

    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_submit_resumes_a_stalled_finalize_right_away() {
    let server = FakeServer::new(Some(60));
    server.finish_failures.store(2, Ordering::SeqCst);
    let store = Arc::new(MemoryStore::new());
    let config = RuntimeConfig {
        // Next poll tick at 3780 s, well after the submit below.
        poll_interval: Duration::from_secs(7 * 60),
        retry: RetryPolicy::immediate(2),
        ..RuntimeConfig::default()
    };
    let (observer, seen) = recorder();
    let handle = load(&server, &store, config, vec![observer]).await;

    tokio::time::sleep(Duration::from_secs(3601)).await;
    assert!(matches!(
        handle.state(),
        LifecycleState::FinishPending {
            reason: FinishReason::Expired
        }
    ));
    assert_eq!(server.finish_calls(), 2);

    let before = tokio::time::Instant::now();
    let verdict = handle.submit().await.unwrap();
    assert!(before.elapsed() < Duration::from_secs(1), "{:?}", before.elapsed());
    assert_eq!(verdict.reason, FinishReason::Expired);
    assert_eq!(verdict.finished_at, t0() + TimeDelta::seconds(3601));
    assert_eq!(server.finish_calls(), 3);

    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_finishes_after_every_handle_is_dropped() {
    let server = FakeServer::new(Some(20));
    let store = Arc::new(MemoryStore::new());
    let (observer, seen) = recorder();
    let handle = load(&server, &store, RuntimeConfig::default(), vec![observer]).await;
    handle.edit_code(QuestionId(1), "unsaved idea").await.unwrap();
    drop(handle);

    tokio::time::sleep(Duration::from_secs(25 * 60)).await;

    assert_eq!(server.finish_calls(), 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "notified exactly once");
    assert_eq!(seen[0].reason, FinishReason::Expired);
    assert_eq!(seen[0].finished_at, t0() + minutes(20));
    assert!(store.is_empty(), "drafts cleared after finish");
}

#[tokio::test(start_paused = true)]
async fn test_info_reports_tick_counters() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let config = RuntimeConfig {
        poll_interval: Duration::from_secs(3),
        ..RuntimeConfig::default()
    };
    let handle = load(&server, &store, config, vec![]).await;

    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let info = handle.info().await.unwrap();
    assert_eq!(info.countdown_ticks.total_ticks, 10);
    assert_eq!(info.countdown_ticks.total_overruns, 0);
    assert_eq!(info.countdown_ticks.total_skipped, 0);
    assert_eq!(info.poll_ticks.total_ticks, 3);
    assert_eq!(info.polls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_drafts_survive_shutdown_and_reload() {
    let server = FakeServer::new(Some(60));
    let store = Arc::new(MemoryStore::new());
    let config = RuntimeConfig::default();

    let handle = load(&server, &store, config.clone(), vec![]).await;
    handle.edit_code(QuestionId(2), "partial code").await.unwrap();
    handle.shutdown().await.unwrap();
    assert!(matches!(
        handle.info().await,
        Err(RuntimeError::Unavailable(SID))
    ));

    let drafts = DraftStore::load(Arc::clone(&store), key(&config), starters()).await;
    assert_eq!(drafts.get(QuestionId(2)).unwrap().code, "partial code");
    assert_eq!(drafts.get(QuestionId(1)).unwrap().code, "starter");
    assert!(store.get(key(&config).as_str()).await.unwrap().is_some());
}
