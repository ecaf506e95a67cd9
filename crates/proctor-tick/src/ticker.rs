//! Fixed-period tick scheduler.
//!
//! A [`Ticker`] fires every `period` until it is stopped. Stopping goes
//! through a cloneable [`StopHandle`] so the owner of the ticker and the
//! component that decides it should stop (the lifecycle coordinator)
//! don't have to be the same object.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the ticker wakes up later than scheduled.
///
/// Late wake-ups happen when the process was suspended (laptop lid
/// closed) or the runtime was starved. Countdown values are always
/// recomputed from the clock, so a missed tick loses nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPolicy {
    /// Skip the missed tick(s) and resume from now.
    #[default]
    Skip,
    /// Keep the original cadence: the next tick fires at its originally
    /// scheduled time, which may be immediately.
    Drop,
}

/// Configuration for a [`Ticker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Time between ticks.
    pub period: Duration,
    /// Late wake-up handling.
    pub policy: TickPolicy,
    /// Random jitter (0..max) added to the *first* tick. Spreads out
    /// pollers of sessions that were loaded at the same instant.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            policy: TickPolicy::default(),
            initial_jitter: Duration::ZERO,
        }
    }
}

impl TickConfig {
    /// Shortest period we accept.
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    /// A config ticking every `period` with no jitter.
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Adds first-tick jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Ticker::new`]. `period` is raised to
    /// [`Self::MIN_PERIOD`]; jitter is capped at one period.
    pub fn validated(mut self) -> Self {
        if self.period < Self::MIN_PERIOD {
            warn!(
                period_ms = self.period.as_millis() as u64,
                min_ms = Self::MIN_PERIOD.as_millis() as u64,
                "tick period below minimum, clamping"
            );
            self.period = Self::MIN_PERIOD;
        }
        if self.initial_jitter > self.period {
            self.initial_jitter = self.period;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`Ticker::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// `true` if this tick fired late.
    pub overrun: bool,
    /// How many whole periods were missed (0 in normal operation).
    pub ticks_skipped: u64,
}

/// Runtime counters for a ticker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
}

impl std::ops::AddAssign for TickMetrics {
    fn add_assign(&mut self, other: Self) {
        self.total_ticks += other.total_ticks;
        self.total_overruns += other.total_overruns;
        self.total_skipped += other.total_skipped;
    }
}

// ---------------------------------------------------------------------------
// StopHandle
// ---------------------------------------------------------------------------

/// Cloneable handle that stops a [`Ticker`].
///
/// Stopping is permanent for the ticker it was taken from. Calling
/// [`stop`](Self::stop) more than once is harmless.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stops the ticker. Any pending `wait_for_tick` pends forever.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the handle is stopped.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` can't see a closed
        // channel while we're waiting.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Fixed-period tick scheduler.
pub struct Ticker {
    config: TickConfig,
    tick_count: u64,
    /// When the next tick should fire (Tokio instant for `sleep_until`).
    next_tick: TokioInstant,
    stop: StopHandle,
    metrics: TickMetrics,
}

impl Ticker {
    /// Creates a running ticker. The first tick fires one period (plus
    /// optional jitter) from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter > Duration::ZERO {
            let max_us = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max_us.max(1)))
        } else {
            Duration::ZERO
        };
        let next_tick = TokioInstant::now() + config.period + jitter;

        debug!(
            period_ms = config.period.as_millis() as u64,
            policy = ?config.policy,
            "ticker created"
        );

        Self {
            config,
            tick_count: 0,
            next_tick,
            stop: StopHandle::new(),
            metrics: TickMetrics::default(),
        }
    }

    /// Creates a ticker firing every `period` with default settings.
    pub fn every(period: Duration) -> Self {
        Self::new(TickConfig::every(period))
    }

    /// Waits until the next tick is due.
    ///
    /// Once stopped, this future pends forever; `tokio::select!` keeps
    /// processing its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        if self.stop.is_stopped() {
            std::future::pending::<()>().await;
        }

        tokio::select! {
            _ = time::sleep_until(self.next_tick) => {}
            _ = self.stop.stopped() => {
                std::future::pending::<()>().await;
            }
        }

        let scheduled = self.next_tick;
        let period = self.config.period;
        let now = TokioInstant::now();
        self.tick_count += 1;

        // More than 10% late counts as an overrun.
        let late_by = now.saturating_duration_since(scheduled);
        let overrun = late_by > period / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    ticks_skipped =
                        (late_by.as_nanos() / period.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_millis() as u64,
                            "ticker woke late, skipping ahead"
                        );
                    }
                }
                now + period
            }
            TickPolicy::Drop => scheduled + period,
        };

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Stops the ticker. Idempotent.
    pub fn stop(&self) {
        if !self.stop.is_stopped() {
            debug!(tick = self.tick_count, "ticker stopped");
        }
        self.stop.stop();
    }

    /// A handle that can stop this ticker from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}
