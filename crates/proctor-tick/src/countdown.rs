//! The session countdown.
//!
//! ```text
//!   Stopped ──start()──→ Ticking ──remaining hits 0──→ Expired
//!      ↑                    │                             │
//!      └──────stop()────────┴────────────stop()───────────┘
//! ```
//!
//! Remaining time is never counted down locally. Every tick recomputes
//! `deadline - tracker.now()`, so a reseeded deadline, a fresh clock
//! sample, or a suspended process are all reflected on the next tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{ClockOffsetTracker, StopHandle, TickConfig, TickMetrics, Ticker};

/// Lifecycle of a [`CountdownScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Stopped,
    Ticking,
    /// Remaining time reached zero. Terminal until `stop()`.
    Expired,
}

/// What a countdown tick produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// Time left, published to observers.
    Tick { remaining: Duration },
    /// Raised once, on the tick where remaining reached zero.
    Expired,
}

/// One-second countdown to a session deadline.
pub struct CountdownScheduler {
    tick_config: TickConfig,
    tracker: ClockOffsetTracker,
    deadline: Option<DateTime<Utc>>,
    ticker: Option<Ticker>,
    /// Counters of tickers already stopped.
    past_metrics: TickMetrics,
    state: CountdownState,
    /// Latest remaining time for display. `None` while stopped.
    remaining_tx: watch::Sender<Option<Duration>>,
}

impl CountdownScheduler {
    /// A stopped countdown that ticks at `tick_config.period` once started.
    pub fn new(tracker: ClockOffsetTracker, tick_config: TickConfig) -> Self {
        let (remaining_tx, _) = watch::channel(None);
        Self {
            tick_config,
            tracker,
            deadline: None,
            ticker: None,
            past_metrics: TickMetrics::default(),
            state: CountdownState::Stopped,
            remaining_tx,
        }
    }

    /// A stopped countdown ticking once per second.
    pub fn every_second(tracker: ClockOffsetTracker) -> Self {
        Self::new(tracker, TickConfig::every(Duration::from_secs(1)))
    }

    /// `Stopped → Ticking` toward `deadline`.
    ///
    /// Calling `start` while already ticking behaves like
    /// [`reseed`](Self::reseed). An expired countdown must be stopped
    /// before it can start again.
    pub fn start(&mut self, deadline: DateTime<Utc>) {
        match self.state() {
            CountdownState::Ticking => self.reseed(deadline),
            CountdownState::Expired => {
                debug!("countdown already expired, ignoring start");
            }
            CountdownState::Stopped => {
                self.deadline = Some(deadline);
                self.ticker = Some(Ticker::new(self.tick_config.clone()));
                self.state = CountdownState::Ticking;
                let remaining = self.compute_remaining(deadline);
                self.remaining_tx.send_replace(Some(remaining));
                info!(
                    %deadline,
                    remaining_secs = remaining.as_secs(),
                    "countdown started"
                );
            }
        }
    }

    /// Moves the target while ticking without resetting the ticker.
    ///
    /// Ignored in any other state: a stopped countdown has nothing to
    /// move, and an expired one has already raised its signal.
    pub fn reseed(&mut self, deadline: DateTime<Utc>) {
        if self.state() != CountdownState::Ticking {
            debug!(state = ?self.state(), "countdown not ticking, ignoring reseed");
            return;
        }
        let previous = self.deadline.replace(deadline);
        let remaining = self.compute_remaining(deadline);
        self.remaining_tx.send_replace(Some(remaining));
        info!(
            ?previous,
            %deadline,
            remaining_secs = remaining.as_secs(),
            "countdown reseeded"
        );
    }

    /// Cancels the periodic tick. Callable from any state.
    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
            self.past_metrics += *ticker.metrics();
        }
        if self.state != CountdownState::Stopped {
            debug!(state = ?self.state, "countdown stopped");
        }
        self.state = CountdownState::Stopped;
        self.remaining_tx.send_replace(None);
    }

    /// A handle that stops the underlying ticker from elsewhere.
    ///
    /// `None` unless ticking. After the handle fires, [`state`](Self::state)
    /// reports `Stopped` and [`next_event`](Self::next_event) pends forever.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.ticker.as_ref().map(Ticker::stop_handle)
    }

    pub fn state(&self) -> CountdownState {
        match &self.ticker {
            Some(t) if t.is_stopped() && self.state == CountdownState::Ticking => {
                CountdownState::Stopped
            }
            _ => self.state,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Remaining time right now, or `None` while stopped.
    pub fn remaining(&self) -> Option<Duration> {
        match (self.state(), self.deadline) {
            (CountdownState::Ticking, Some(deadline)) => {
                Some(self.compute_remaining(deadline))
            }
            (CountdownState::Expired, _) => Some(Duration::ZERO),
            _ => None,
        }
    }

    /// Tick counters over every start of this countdown.
    pub fn metrics(&self) -> TickMetrics {
        let mut metrics = self.past_metrics;
        if let Some(ticker) = &self.ticker {
            metrics += *ticker.metrics();
        }
        metrics
    }

    /// Subscribes to remaining-time updates (published every tick).
    pub fn subscribe(&self) -> watch::Receiver<Option<Duration>> {
        self.remaining_tx.subscribe()
    }

    /// Waits for the next tick and returns what it produced.
    ///
    /// Pends forever unless ticking, so it is safe to keep in a
    /// `select!` loop for the whole session.
    pub async fn next_event(&mut self) -> CountdownEvent {
        if self.state() != CountdownState::Ticking {
            return std::future::pending().await;
        }
        let (Some(ticker), Some(_)) = (self.ticker.as_mut(), self.deadline) else {
            return std::future::pending().await;
        };

        ticker.wait_for_tick().await;

        // Read the deadline after the tick: it may have been reseeded
        // while we were waiting.
        let deadline = self.deadline.unwrap_or_else(|| self.tracker.now());
        let remaining = self.compute_remaining(deadline);
        self.remaining_tx.send_replace(Some(remaining));

        if remaining.is_zero() {
            self.state = CountdownState::Expired;
            if let Some(ticker) = &self.ticker {
                ticker.stop();
            }
            info!(%deadline, "countdown expired");
            CountdownEvent::Expired
        } else {
            CountdownEvent::Tick { remaining }
        }
    }

    fn compute_remaining(&self, deadline: DateTime<Utc>) -> Duration {
        // `to_std` fails for negative deltas: the deadline has passed.
        (deadline - self.tracker.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Renders remaining time as `MM:SS`, or `H:MM:SS` from one hour up.
/// Partial seconds round up, so the display only reads `00:00` at expiry.
pub fn format_remaining(remaining: Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
