//! The lifecycle coordinator: one finish, no matter who asks.
//!
//! # The race it closes
//!
//! The finalize step suspends on network I/O (re-fetch, then finish).
//! While it is suspended, the poller may see a terminal status, or the
//! participant may press "finish" a second time. Without a guard, each
//! of those would call the finish endpoint again and report the verdict
//! again. The guard is a test-and-set on the state, taken under a mutex
//! that is never held across an `.await`.
//!
//! # Concurrency note
//!
//! The coordinator is shared through an `Arc` between the session actor
//! and the task running the finalize step. Every method takes `&self`.

use std::sync::{Arc, Mutex, MutexGuard};

use proctor_protocol::{FinishSummary, SessionId, SessionStatus};
use proctor_tick::{ClockOffsetTracker, StopHandle};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    ClientError, FinishObserver, FinishOutcome, FinishReason, LifecycleState,
    RetryPolicy, SessionClient, SessionError, Verdict,
};

/// State guarded by the coordinator's mutex.
struct Inner {
    state: LifecycleState,
    /// `true` while some task is running a finalize round.
    finalizing: bool,
}

/// Owns the `Running → FinishPending → Finished` state machine of one
/// session.
///
/// No other component sets the lifecycle state. Others *request* a
/// finish; the coordinator decides whether the request does anything.
pub struct LifecycleCoordinator<C: SessionClient> {
    session_id: SessionId,
    client: Arc<C>,
    tracker: ClockOffsetTracker,
    retry: RetryPolicy,
    inner: Mutex<Inner>,
    /// Publishes every state change. Read side for observers that poll.
    state_tx: watch::Sender<LifecycleState>,
    observers: Mutex<Vec<Arc<dyn FinishObserver>>>,
    /// Tickers to stop on `Finished` (countdown, poller).
    stops: Mutex<Vec<StopHandle>>,
}

impl<C: SessionClient> LifecycleCoordinator<C> {
    /// Creates a coordinator in the `Running` state.
    pub fn new(
        session_id: SessionId,
        client: Arc<C>,
        tracker: ClockOffsetTracker,
        retry: RetryPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Running);
        Self {
            session_id,
            client,
            tracker,
            retry: retry.validated(),
            inner: Mutex::new(Inner {
                state: LifecycleState::Running,
                finalizing: false,
            }),
            state_tx,
            observers: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lock_inner().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_inner().state.is_running()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Registers an observer for the verdict.
    ///
    /// If the session already finished, the observer is *not* called:
    /// every observer sees at most one notification, and a late one
    /// should read [`state`](Self::state) instead.
    pub fn add_observer(&self, observer: impl FinishObserver) {
        lock(&self.observers).push(Arc::new(observer));
    }

    /// Registers a ticker to stop when the session finishes.
    ///
    /// A handle attached after the session finished is stopped at once.
    pub fn attach_stop(&self, handle: StopHandle) {
        if self.lock_inner().state.is_finished() {
            handle.stop();
            return;
        }
        lock(&self.stops).push(handle);
    }

    /// Requests that the session finish.
    ///
    /// Only the first request while `Running` does anything; every other
    /// request returns [`FinishOutcome::Ignored`]. For a
    /// [`FinishReason::TerminalStatus`] the status is final as-is.
    /// Otherwise the session is re-fetched (the server may have finished
    /// it for another cause) and, if still in progress, finished through
    /// the client.
    ///
    /// # Errors
    /// [`SessionError::FinalizeStalled`] if every attempt of the finalize
    /// round failed. The session stays `FinishPending`.
    pub async fn request_finish(
        &self,
        reason: FinishReason,
    ) -> Result<FinishOutcome, SessionError> {
        {
            let mut inner = self.lock_inner();
            if !inner.state.is_running() {
                debug!(
                    session_id = %self.session_id,
                    %reason,
                    state = %inner.state,
                    "finish already underway, ignoring request"
                );
                return Ok(FinishOutcome::Ignored(inner.state.clone()));
            }
            inner.state = LifecycleState::FinishPending {
                reason: reason.clone(),
            };
            inner.finalizing = true;
            self.state_tx.send_replace(inner.state.clone());
        }

        info!(session_id = %self.session_id, %reason, "finish requested");

        if let FinishReason::TerminalStatus(status) = &reason {
            let status = status.clone();
            let verdict = self.complete(status, reason, None);
            return Ok(FinishOutcome::Finished(verdict));
        }
        self.finalize(reason).await
    }

    /// Runs another finalize round for a session left `FinishPending` by
    /// a stalled round.
    ///
    /// Ignored when the session isn't pending or a round is already in
    /// flight.
    pub async fn resume_finalize(&self) -> Result<FinishOutcome, SessionError> {
        let reason = {
            let mut guard = self.lock_inner();
            let inner = &mut *guard;
            match &inner.state {
                LifecycleState::FinishPending { reason } if !inner.finalizing => {
                    let reason = reason.clone();
                    inner.finalizing = true;
                    reason
                }
                other => return Ok(FinishOutcome::Ignored(other.clone())),
            }
        };
        info!(session_id = %self.session_id, %reason, "resuming stalled finalize");
        self.finalize(reason).await
    }

    /// Whether a stalled finalize round is waiting for
    /// [`resume_finalize`](Self::resume_finalize).
    pub fn is_stalled(&self) -> bool {
        let inner = self.lock_inner();
        matches!(inner.state, LifecycleState::FinishPending { .. }) && !inner.finalizing
    }

    /// Resolves with the verdict once the session has finished.
    pub async fn wait_finished(&self) -> Verdict {
        let mut rx = self.state_tx.subscribe();
        loop {
            if let LifecycleState::Finished(verdict) = &*rx.borrow_and_update() {
                return verdict.clone();
            }
            // The sender lives in `self`, so the channel can't close here.
            let _ = rx.changed().await;
        }
    }

    // -- internals ---------------------------------------------------------

    /// One finalize round: up to `max_attempts` tries with backoff.
    async fn finalize(&self, reason: FinishReason) -> Result<FinishOutcome, SessionError> {
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                debug!(
                    session_id = %self.session_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying finalize"
                );
                tokio::time::sleep(delay).await;
            }

            match self.finalize_once().await {
                Ok((status, summary)) => {
                    let verdict = self.complete(status, reason, summary);
                    return Ok(FinishOutcome::Finished(verdict));
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        attempt = attempt + 1,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "finalize attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        self.lock_inner().finalizing = false;
        let attempts = self.retry.max_attempts;
        warn!(session_id = %self.session_id, attempts, "finalize round stalled");
        Err(SessionError::FinalizeStalled {
            session_id: self.session_id,
            attempts,
            last: last_error
                .unwrap_or_else(|| ClientError::Network("no attempt was made".into())),
        })
    }

    /// Re-fetch, then finish if the server still says in progress.
    async fn finalize_once(
        &self,
    ) -> Result<(SessionStatus, Option<FinishSummary>), ClientError> {
        let snapshot = self.client.fetch_session(self.session_id).await?;
        self.tracker.observe(snapshot.server_now);

        if snapshot.session.is_terminal() {
            debug!(
                session_id = %self.session_id,
                status = %snapshot.session.status,
                "server already finished the session"
            );
            return Ok((snapshot.session.status, None));
        }

        let report = self.client.finish_session(self.session_id).await?;
        if let Some(server_now) = report.server_now {
            self.tracker.observe(server_now);
        }
        if !report.status.is_terminal() {
            return Err(ClientError::Malformed(
                "finish operation returned IN_PROGRESS".into(),
            ));
        }
        Ok((report.status, Some(report.summary)))
    }

    /// `FinishPending → Finished`, then stop tickers and notify observers.
    fn complete(
        &self,
        status: SessionStatus,
        reason: FinishReason,
        summary: Option<FinishSummary>,
    ) -> Verdict {
        let verdict = Verdict {
            status,
            reason,
            summary,
            finished_at: self.tracker.now(),
        };

        {
            let mut inner = self.lock_inner();
            if let LifecycleState::Finished(existing) = &inner.state {
                // Observers are notified at most once.
                return existing.clone();
            }
            inner.state = LifecycleState::Finished(verdict.clone());
            inner.finalizing = false;
            self.state_tx.send_replace(inner.state.clone());
        }

        for handle in lock(&self.stops).drain(..) {
            handle.stop();
        }

        info!(
            session_id = %self.session_id,
            status = %verdict.status,
            reason = %verdict.reason,
            "session finished"
        );

        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.on_finished(&verdict);
        }

        verdict
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }
}

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
