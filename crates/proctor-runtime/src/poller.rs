//! Reconciliation against server-side changes the client didn't make.
//!
//! An administrator can extend a session, move its slot cutoff, or end it
//! outright, and none of that reaches the client unless it asks. The
//! poller asks every `poll_interval` and folds the answer back into one
//! of three outcomes:
//!
//! | server copy                              | outcome                 |
//! |------------------------------------------|-------------------------|
//! | status is anything but `IN_PROGRESS`     | [`Reconciliation::Terminal`] |
//! | start, duration, cutoff or exemption moved | [`Reconciliation::Reseed`]   |
//! | nothing relevant changed                 | [`Reconciliation::Unchanged`] |
//!
//! A terminal status wins over any local countdown state. A failed poll is
//! logged and forgotten; the next tick tries again, and a failure never
//! triggers a finish.

use std::time::Duration;

use chrono::{DateTime, Utc};
use proctor_protocol::{SessionMeta, SessionSnapshot, SessionStatus};
use proctor_session::{ClientError, DeadlineResolver, SessionClient};
use proctor_tick::{ClockOffsetTracker, StopHandle, TickConfig, TickInfo, TickMetrics, Ticker};
use tracing::{debug, info, warn};

/// What a poll result means for the running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The server concluded the session. Finish with this status.
    Terminal(SessionStatus),
    /// Timing changed. Move the countdown to the new deadline; `None`
    /// means the session is now untimed.
    Reseed(Option<DateTime<Utc>>),
    Unchanged,
}

/// Polls the session and compares each answer with the last known copy.
pub struct ReconciliationPoller {
    known: SessionMeta,
    tracker: ClockOffsetTracker,
    ticker: Ticker,
    polls: u64,
    failures: u64,
}

impl ReconciliationPoller {
    /// Starts polling; the first tick fires one interval from now.
    ///
    /// `initial` is the copy the session was loaded with.
    pub fn new(initial: SessionMeta, tracker: ClockOffsetTracker, tick: TickConfig) -> Self {
        Self {
            known: initial,
            tracker,
            ticker: Ticker::new(tick),
            polls: 0,
            failures: 0,
        }
    }

    /// Polls every `interval` with default tick settings.
    pub fn every(initial: SessionMeta, tracker: ClockOffsetTracker, interval: Duration) -> Self {
        Self::new(initial, tracker, TickConfig::every(interval))
    }

    /// The most recent server copy.
    pub fn known(&self) -> &SessionMeta {
        &self.known
    }

    /// Waits for the next poll tick. Pends forever once stopped.
    pub async fn next_poll(&mut self) -> TickInfo {
        self.ticker.wait_for_tick().await
    }

    /// Stops issuing polls.
    pub fn stop(&self) {
        self.ticker.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.ticker.is_stopped()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.ticker.stop_handle()
    }

    /// Successful polls so far.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Failed polls so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Counters of the poll ticker, including late wake-ups.
    pub fn tick_metrics(&self) -> TickMetrics {
        *self.ticker.metrics()
    }

    /// Folds a fresh server copy into the known state.
    ///
    /// Feeds the server timestamp to the clock tracker, replaces the known
    /// copy wholesale, and reports what changed.
    pub fn reconcile(&mut self, snapshot: SessionSnapshot) -> Reconciliation {
        self.tracker.observe(snapshot.server_now);
        self.polls += 1;

        let fresh = snapshot.session;
        let previous = std::mem::replace(&mut self.known, fresh);
        let fresh = &self.known;

        if fresh.is_terminal() {
            info!(
                session_id = %fresh.session_id,
                status = %fresh.status,
                "server reports session concluded"
            );
            return Reconciliation::Terminal(fresh.status.clone());
        }

        if fresh.timing_differs(&previous) {
            let deadline = DeadlineResolver::resolve(fresh);
            info!(
                session_id = %fresh.session_id,
                old_deadline = ?DeadlineResolver::resolve(&previous),
                new_deadline = ?deadline,
                "session timing changed on the server"
            );
            return Reconciliation::Reseed(deadline);
        }

        debug!(session_id = %fresh.session_id, poll = self.polls, "poll: no change");
        Reconciliation::Unchanged
    }

    /// Records a failed poll. Nothing else happens until the next tick.
    pub fn record_failure(&mut self, error: &ClientError) {
        self.failures += 1;
        warn!(
            session_id = %self.known.session_id,
            failures = self.failures,
            %error,
            "session poll failed, will retry next tick"
        );
    }

    /// Polls once through `client` and reconciles the answer.
    ///
    /// `None` if the poll failed (already recorded).
    pub async fn poll_once<C: SessionClient>(&mut self, client: &C) -> Option<Reconciliation> {
        match client.poll_session(self.known.session_id).await {
            Ok(snapshot) => Some(self.reconcile(snapshot)),
            Err(e) => {
                self.record_failure(&e);
                None
            }
        }
    }
}
