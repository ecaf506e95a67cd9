//! Session actor: one Tokio task per running assessment session.
//!
//! The actor owns the countdown, the reconciliation poller, the drafts
//! and the submission tracker. Every event source feeds one
//! `tokio::select!` loop, and each handler runs to completion:
//!
//! - the countdown tick (1 Hz),
//! - the reconciliation tick (every 30 s),
//! - commands from [`SessionHandle`]s (edit, run tests, submit, ...),
//! - results of network calls the actor spawned,
//! - lifecycle changes published by the coordinator.
//!
//! Network calls never run on the loop itself. Polls, test runs and the
//! finalize step are spawned, so a slow server can't freeze the
//! countdown. That is also why finishing goes through the coordinator's
//! guard rather than a flag on the actor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use proctor_drafts::{DraftStore, Drafts};
use proctor_protocol::{ExecutionReport, QuestionId, SessionId, SessionMeta, SessionSnapshot};
use proctor_session::{
    ClientError, DeadlineResolver, FinishObserver, FinishOutcome, FinishReason,
    LifecycleCoordinator, LifecycleState, SessionClient, Verdict,
};
use proctor_tick::{
    ClockOffsetTracker, CountdownEvent, CountdownScheduler, CountdownState, TickMetrics,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::{
    Reconciliation, ReconciliationPoller, RuntimeConfig, RuntimeError, SessionVerdict,
    SubmissionTracker,
};

/// Commands sent to a session actor through its channel.
///
/// Variants carrying a `oneshot::Sender` are requests; the actor answers
/// on that channel.
pub(crate) enum SessionCommand {
    /// The participant pressed "finish".
    Submit {
        reply: oneshot::Sender<Result<Verdict, RuntimeError>>,
    },

    /// Replace the code of one question.
    EditCode {
        question: QuestionId,
        code: String,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },

    /// Run the question's current code against its test cases.
    RunTests {
        question: QuestionId,
        reply: oneshot::Sender<Result<ExecutionReport, RuntimeError>>,
    },

    /// Poll the server now instead of waiting for the next tick.
    Refresh {
        reply: oneshot::Sender<Result<Reconciliation, RuntimeError>>,
    },

    GetInfo {
        reply: oneshot::Sender<SessionInfo>,
    },

    GetDrafts {
        reply: oneshot::Sender<Drafts>,
    },

    /// Stop the actor. The session is *not* finished; drafts are flushed.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Results of work the actor spawned off its loop.
enum TaskResult {
    Polled(Result<SessionSnapshot, ClientError>),
    Executed {
        result: Result<ExecutionReport, ClientError>,
        reply: oneshot::Sender<Result<ExecutionReport, RuntimeError>>,
    },
}

/// A snapshot of a session as the actor sees it.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub lifecycle: LifecycleState,
    pub countdown: CountdownState,
    /// Time left, while the countdown is running (zero once expired).
    pub remaining: Option<Duration>,
    /// Effective deadline; `None` for an untimed session.
    pub deadline: Option<DateTime<Utc>>,
    /// Latest server copy of the session.
    pub meta: SessionMeta,
    pub verdict: SessionVerdict,
    /// Local clock minus server clock.
    pub clock_offset: TimeDelta,
    pub polls: u64,
    pub poll_failures: u64,
    /// Countdown ticks, with late wake-ups (e.g. a suspended laptop).
    pub countdown_ticks: TickMetrics,
    pub poll_ticks: TickMetrics,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Handle to a running session actor.
///
/// Cheap to clone. Lifecycle state and remaining time are also available
/// without a round trip through [`subscribe_state`](Self::subscribe_state)
/// and [`subscribe_remaining`](Self::subscribe_remaining).
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<LifecycleState>,
    remaining_rx: watch::Receiver<Option<Duration>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state_rx.borrow().clone()
    }

    /// Lifecycle changes, as the coordinator publishes them.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_rx.clone()
    }

    /// Remaining time after every countdown tick; `None` while the
    /// countdown isn't running.
    pub fn subscribe_remaining(&self) -> watch::Receiver<Option<Duration>> {
        self.remaining_rx.clone()
    }

    /// Finishes the session at the participant's request and returns the
    /// verdict.
    ///
    /// If another path (expiry, the poller) is already finishing the
    /// session, waits for that to complete instead. A finish left stalled
    /// by failed attempts is retried right away.
    pub async fn submit(&self) -> Result<Verdict, RuntimeError> {
        self.request(|reply| SessionCommand::Submit { reply }).await?
    }

    /// Replaces the code of `question`. The draft is persisted in the
    /// background.
    pub async fn edit_code(
        &self,
        question: QuestionId,
        code: impl Into<String>,
    ) -> Result<(), RuntimeError> {
        let code = code.into();
        self.request(|reply| SessionCommand::EditCode {
            question,
            code,
            reply,
        })
        .await?
    }

    /// Runs the current code of `question` and records the outcomes.
    pub async fn run_tests(&self, question: QuestionId) -> Result<ExecutionReport, RuntimeError> {
        self.request(|reply| SessionCommand::RunTests { question, reply })
            .await?
    }

    /// Polls the server immediately and reports what changed.
    pub async fn refresh(&self) -> Result<Reconciliation, RuntimeError> {
        self.request(|reply| SessionCommand::Refresh { reply }).await?
    }

    pub async fn info(&self) -> Result<SessionInfo, RuntimeError> {
        self.request(|reply| SessionCommand::GetInfo { reply }).await
    }

    /// The merged drafts, including edits made since load.
    pub async fn drafts(&self) -> Result<Drafts, RuntimeError> {
        self.request(|reply| SessionCommand::GetDrafts { reply }).await
    }

    /// Resolves with the verdict once the session has finished, whatever
    /// finished it.
    pub async fn wait_finished(&self) -> Result<Verdict, RuntimeError> {
        let mut rx = self.state_rx.clone();
        let verdict = rx
            .wait_for(LifecycleState::is_finished)
            .await
            .map_err(|_| RuntimeError::Unavailable(self.session_id))?
            .verdict()
            .cloned();
        verdict.ok_or(RuntimeError::Unavailable(self.session_id))
    }

    /// Stops the actor after flushing drafts. Does not finish the session.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| RuntimeError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| RuntimeError::Unavailable(self.session_id))
    }
}

// ---------------------------------------------------------------------------
// SessionActor
// ---------------------------------------------------------------------------

struct SessionActor<C: SessionClient> {
    session_id: SessionId,
    client: Arc<C>,
    coordinator: Arc<LifecycleCoordinator<C>>,
    tracker: ClockOffsetTracker,
    countdown: CountdownScheduler,
    poller: ReconciliationPoller,
    drafts: DraftStore,
    submissions: SubmissionTracker,
    config: RuntimeConfig,
    commands: mpsc::Receiver<SessionCommand>,
    tasks_tx: mpsc::UnboundedSender<TaskResult>,
    tasks_rx: mpsc::UnboundedReceiver<TaskResult>,
    state_rx: watch::Receiver<LifecycleState>,
    poll_in_flight: bool,
    refresh_waiters: Vec<oneshot::Sender<Result<Reconciliation, RuntimeError>>>,
    /// Cleared when every handle is gone. The session still runs to its
    /// finish; only an explicit shutdown abandons it.
    handles_open: bool,
    /// Set once the `Finished` state has been handled.
    concluded: bool,
}

impl<C: SessionClient> SessionActor<C> {
    /// Seeds the countdown from the loaded copy, or finishes right away
    /// if the server already concluded the session.
    fn begin(&mut self, meta: &SessionMeta) {
        if meta.is_terminal() {
            info!(
                session_id = %self.session_id,
                status = %meta.status,
                "session already concluded on load"
            );
            self.spawn_finish(FinishReason::TerminalStatus(meta.status.clone()));
            return;
        }
        match DeadlineResolver::resolve(meta) {
            Some(deadline) => self.start_countdown(deadline),
            None => info!(session_id = %self.session_id, "untimed session, no countdown"),
        }
    }

    /// Runs the actor loop until shutdown, or until the session has
    /// finished and every handle is gone.
    async fn run(mut self) {
        info!(session_id = %self.session_id, "session actor started");
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                cmd = self.commands.recv(), if self.handles_open => {
                    let Some(cmd) = cmd else {
                        self.handles_open = false;
                        if self.concluded {
                            debug!(session_id = %self.session_id, "all handles dropped");
                            break;
                        }
                        debug!(
                            session_id = %self.session_id,
                            "all handles dropped, running until the session finishes"
                        );
                        continue;
                    };
                    if let SessionCommand::Shutdown { reply } = cmd {
                        info!(session_id = %self.session_id, "session actor shutting down");
                        shutdown_reply = Some(reply);
                        break;
                    }
                    self.handle_command(cmd);
                }
                event = self.countdown.next_event() => {
                    self.on_countdown(event);
                }
                _ = self.poller.next_poll() => {
                    self.on_poll_tick();
                }
                Some(result) = self.tasks_rx.recv() => {
                    self.on_task_result(result);
                }
                changed = self.state_rx.changed(), if !self.concluded => {
                    if changed.is_err() {
                        break;
                    }
                    self.on_state_change().await;
                    if self.concluded && !self.handles_open {
                        break;
                    }
                }
            }
        }

        self.countdown.stop();
        self.poller.stop();
        if !self.concluded {
            self.log_tick_totals();
        }
        if let Err(e) = self.drafts.flush().await {
            warn!(session_id = %self.session_id, error = %e, "drafts not flushed on shutdown");
        }
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        info!(session_id = %self.session_id, "session actor stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Submit { reply } => self.handle_submit(reply),
            SessionCommand::EditCode {
                question,
                code,
                reply,
            } => {
                let _ = reply.send(self.handle_edit(question, code));
            }
            SessionCommand::RunTests { question, reply } => self.handle_run_tests(question, reply),
            SessionCommand::Refresh { reply } => self.handle_refresh(reply),
            SessionCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            SessionCommand::GetDrafts { reply } => {
                let _ = reply.send(self.drafts.drafts().clone());
            }
            SessionCommand::Shutdown { reply } => {
                // Intercepted by the loop; answer anyway.
                let _ = reply.send(());
            }
        }
    }

    fn handle_submit(&mut self, reply: oneshot::Sender<Result<Verdict, RuntimeError>>) {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            let mut outcome = coordinator.request_finish(FinishReason::UserRequested).await;
            // A stalled round would otherwise wait for the next poll tick.
            if matches!(outcome, Ok(FinishOutcome::Ignored(_))) && coordinator.is_stalled() {
                outcome = coordinator.resume_finalize().await;
            }
            let result = match outcome {
                Ok(FinishOutcome::Finished(verdict)) => Ok(verdict),
                Ok(FinishOutcome::Ignored(_)) => Ok(coordinator.wait_finished().await),
                Err(e) => Err(e.into()),
            };
            let _ = reply.send(result);
        });
    }

    fn handle_edit(&mut self, question: QuestionId, code: String) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        if self.drafts.get(question).is_none() {
            return Err(RuntimeError::UnknownQuestion(question));
        }
        trace!(session_id = %self.session_id, %question, bytes = code.len(), "code edited");
        self.drafts.update(question, code);
        Ok(())
    }

    fn handle_run_tests(
        &mut self,
        question: QuestionId,
        reply: oneshot::Sender<Result<ExecutionReport, RuntimeError>>,
    ) {
        if let Err(e) = self.ensure_running() {
            let _ = reply.send(Err(e));
            return;
        }
        let Some(draft) = self.drafts.get(question) else {
            let _ = reply.send(Err(RuntimeError::UnknownQuestion(question)));
            return;
        };
        let code = draft.code.clone();
        debug!(session_id = %self.session_id, %question, "running tests");

        let client = Arc::clone(&self.client);
        let tasks = self.tasks_tx.clone();
        let session_id = self.session_id;
        tokio::spawn(async move {
            let result = client.execute(session_id, question, code).await;
            let _ = tasks.send(TaskResult::Executed { result, reply });
        });
    }

    fn handle_refresh(&mut self, reply: oneshot::Sender<Result<Reconciliation, RuntimeError>>) {
        if let Err(e) = self.ensure_running() {
            let _ = reply.send(Err(e));
            return;
        }
        self.refresh_waiters.push(reply);
        self.start_poll();
    }

    fn on_countdown(&mut self, event: CountdownEvent) {
        match event {
            CountdownEvent::Tick { remaining } => {
                trace!(
                    session_id = %self.session_id,
                    remaining_secs = remaining.as_secs(),
                    "countdown tick"
                );
            }
            CountdownEvent::Expired => {
                info!(session_id = %self.session_id, "time is up");
                self.spawn_finish(FinishReason::Expired);
            }
        }
    }

    fn on_poll_tick(&mut self) {
        if self.coordinator.is_running() {
            self.start_poll();
        } else if self.coordinator.is_stalled() {
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                if let Err(e) = coordinator.resume_finalize().await {
                    warn!(error = %e, "finalize still failing, will retry next tick");
                }
            });
        }
    }

    fn on_task_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::Polled(result) => {
                self.poll_in_flight = false;
                let outcome = self.on_polled(result);
                for waiter in self.refresh_waiters.drain(..) {
                    let _ = waiter.send(outcome.clone());
                }
            }
            TaskResult::Executed { result, reply } => {
                let result = result.map_err(RuntimeError::from).map(|report| {
                    self.on_executed(&report);
                    report
                });
                let _ = reply.send(result);
            }
        }
    }

    fn on_polled(
        &mut self,
        result: Result<SessionSnapshot, ClientError>,
    ) -> Result<Reconciliation, RuntimeError> {
        let snapshot = result.inspect_err(|e| self.poller.record_failure(e))?;
        // A poll answered after the session left Running changes nothing.
        self.ensure_running()?;

        let reconciliation = self.poller.reconcile(snapshot);
        match &reconciliation {
            Reconciliation::Terminal(status) => {
                self.spawn_finish(FinishReason::TerminalStatus(status.clone()));
            }
            Reconciliation::Reseed(Some(deadline)) => self.start_countdown(*deadline),
            Reconciliation::Reseed(None) => {
                info!(session_id = %self.session_id, "session became untimed, stopping countdown");
                self.countdown.stop();
            }
            Reconciliation::Unchanged => {}
        }
        Ok(reconciliation)
    }

    fn on_executed(&mut self, report: &ExecutionReport) {
        if let Some(server_now) = report.server_now {
            self.tracker.observe(server_now);
        }
        if !self.coordinator.is_running() {
            debug!(
                session_id = %self.session_id,
                question = %report.question_id,
                "execution finished after the session ended, not recorded"
            );
            return;
        }
        if self.submissions.record(report) {
            self.drafts.record_test_outcomes(
                report.question_id,
                report.results.iter().map(|(k, v)| (*k, *v)),
            );
        }
    }

    async fn on_state_change(&mut self) {
        let state = self.state_rx.borrow_and_update().clone();
        let LifecycleState::Finished(verdict) = state else {
            debug!(session_id = %self.session_id, %state, "lifecycle changed");
            return;
        };
        self.concluded = true;

        self.countdown.stop();
        self.poller.stop();
        self.log_tick_totals();
        self.submissions.conclude(verdict.status.clone());

        if let Err(e) = self.drafts.flush().await {
            warn!(session_id = %self.session_id, error = %e, "drafts not flushed");
        }
        if self.config.clear_drafts_on_finish {
            if let Err(e) = self.drafts.clear().await {
                warn!(session_id = %self.session_id, error = %e, "drafts not cleared");
            }
        }

        info!(
            session_id = %self.session_id,
            status = %verdict.status,
            reason = %verdict.reason,
            "session concluded"
        );
    }

    /// Starts the countdown, or moves it if it is already running.
    fn start_countdown(&mut self, deadline: DateTime<Utc>) {
        let was_ticking = self.countdown.state() == CountdownState::Ticking;
        self.countdown.start(deadline);
        if !was_ticking {
            if let Some(handle) = self.countdown.stop_handle() {
                self.coordinator.attach_stop(handle);
            }
        }
    }

    fn start_poll(&mut self) {
        if self.poll_in_flight {
            return;
        }
        self.poll_in_flight = true;
        let client = Arc::clone(&self.client);
        let tasks = self.tasks_tx.clone();
        let session_id = self.session_id;
        tokio::spawn(async move {
            let result = client.poll_session(session_id).await;
            let _ = tasks.send(TaskResult::Polled(result));
        });
    }

    fn spawn_finish(&self, reason: FinishReason) {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            if let Err(e) = coordinator.request_finish(reason).await {
                warn!(error = %e, "finish stalled, will resume on next poll tick");
            }
        });
    }

    fn log_tick_totals(&self) {
        let countdown = self.countdown.metrics();
        let poll = self.poller.tick_metrics();
        info!(
            session_id = %self.session_id,
            countdown_ticks = countdown.total_ticks,
            countdown_overruns = countdown.total_overruns,
            countdown_skipped = countdown.total_skipped,
            poll_ticks = poll.total_ticks,
            poll_overruns = poll.total_overruns,
            "tick totals"
        );
    }

    fn ensure_running(&self) -> Result<(), RuntimeError> {
        let state = self.coordinator.state();
        if state.is_running() {
            Ok(())
        } else {
            Err(RuntimeError::NotRunning {
                session_id: self.session_id,
                state: state.to_string(),
            })
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            lifecycle: self.coordinator.state(),
            countdown: self.countdown.state(),
            remaining: self.countdown.remaining(),
            deadline: DeadlineResolver::resolve(self.poller.known()),
            meta: self.poller.known().clone(),
            verdict: self.submissions.verdict(),
            clock_offset: self.tracker.offset(),
            polls: self.poller.polls(),
            poll_failures: self.poller.failures(),
            countdown_ticks: self.countdown.metrics(),
            poll_ticks: self.poller.tick_metrics(),
        }
    }
}

/// Spawns a session actor for a freshly loaded session.
///
/// `snapshot` is the load response. `tracker` should already hold the
/// sample taken when that response arrived: observing it here would
/// count the draft-loading time as clock offset. `drafts` should already
/// be merged against the starter code. Every
/// observer is told the verdict exactly once.
///
/// Must be called from inside a Tokio runtime.
pub fn spawn_session<C: SessionClient>(
    client: Arc<C>,
    snapshot: SessionSnapshot,
    tracker: ClockOffsetTracker,
    drafts: DraftStore,
    config: RuntimeConfig,
    observers: Vec<Arc<dyn FinishObserver>>,
) -> SessionHandle {
    let config = config.validated();
    let SessionSnapshot { session, .. } = snapshot;
    let session_id = session.session_id;

    let coordinator = Arc::new(LifecycleCoordinator::new(
        session_id,
        Arc::clone(&client),
        tracker.clone(),
        config.retry.clone(),
    ));
    for observer in observers {
        coordinator.add_observer(move |verdict: &Verdict| observer.on_finished(verdict));
    }

    let countdown = CountdownScheduler::new(tracker.clone(), config.countdown_tick());
    let poller = ReconciliationPoller::new(session.clone(), tracker.clone(), config.poll_tick());
    coordinator.attach_stop(poller.stop_handle());

    let mut submissions = SubmissionTracker::new(drafts.drafts().keys().copied());
    for (question, draft) in drafts.drafts() {
        submissions.seed(*question, &draft.last_test_results);
    }

    let (tx, rx) = mpsc::channel(config.command_channel_size);
    let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();

    let handle = SessionHandle {
        session_id,
        sender: tx,
        state_rx: coordinator.subscribe(),
        remaining_rx: countdown.subscribe(),
    };

    let mut actor = SessionActor {
        session_id,
        client,
        state_rx: coordinator.subscribe(),
        coordinator,
        tracker,
        countdown,
        poller,
        drafts,
        submissions,
        config,
        commands: rx,
        tasks_tx,
        tasks_rx,
        poll_in_flight: false,
        refresh_waiters: Vec::new(),
        handles_open: true,
        concluded: false,
    };
    actor.begin(&session);
    tokio::spawn(actor.run());

    handle
}
