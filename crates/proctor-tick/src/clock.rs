//! Local clock and server clock offset.
//!
//! The server is the single source of truth for time. Every response that
//! carries a server timestamp is a chance to correct drift: we remember
//! when we received it (local clock) and what the server said, and from
//! then on translate local "now" into server "now".

use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant as TokioInstant;
use tracing::debug;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time that advances with Tokio's monotonic clock.
///
/// The wall-clock reading is taken once, at construction. After that the
/// clock advances by Tokio elapsed time, so it can't jump backwards when
/// the OS clock is adjusted, and it follows `tokio::time::pause()` /
/// `advance()` in tests.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    anchor_wall: DateTime<Utc>,
    anchor: TokioInstant,
}

impl SystemClock {
    /// Anchors to the current OS wall-clock time.
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Anchors to an arbitrary wall-clock instant.
    pub fn anchored_at(wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall: wall,
            anchor: TokioInstant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TokioInstant::now().saturating_duration_since(self.anchor);
        self.anchor_wall
            + TimeDelta::from_std(elapsed).unwrap_or_else(|_| TimeDelta::zero())
    }
}

// ---------------------------------------------------------------------------
// ServerTimeSample
// ---------------------------------------------------------------------------

/// One observation of the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimeSample {
    /// Local clock reading when the response arrived.
    pub local_receipt: DateTime<Utc>,
    /// The timestamp the server put in the response.
    pub server_reported: DateTime<Utc>,
}

impl ServerTimeSample {
    /// `local_receipt - server_reported`. Positive when the local clock
    /// runs ahead of the server.
    pub fn offset(&self) -> TimeDelta {
        self.local_receipt - self.server_reported
    }
}

// ---------------------------------------------------------------------------
// ClockOffsetTracker
// ---------------------------------------------------------------------------

/// Estimates the server's current time from the latest sample.
///
/// Cheap to clone: clones share the same sample. The countdown calls
/// [`now`](Self::now) every second; every server response calls
/// [`observe`](Self::observe).
#[derive(Clone)]
pub struct ClockOffsetTracker {
    clock: Arc<dyn Clock>,
    sample: Arc<RwLock<Option<ServerTimeSample>>>,
}

impl ClockOffsetTracker {
    pub fn new(clock: impl Clock) -> Self {
        Self {
            clock: Arc::new(clock),
            sample: Arc::new(RwLock::new(None)),
        }
    }

    /// A tracker over a clock shared with other trackers.
    pub fn from_shared(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sample: Arc::new(RwLock::new(None)),
        }
    }

    /// A tracker over [`SystemClock`].
    pub fn system() -> Self {
        Self::new(SystemClock::new())
    }

    /// Stores `sample`, replacing any earlier one. Only the most recent
    /// sample is authoritative, even if it shows a larger offset.
    pub fn record(&self, sample: ServerTimeSample) {
        debug!(
            offset_ms = sample.offset().num_milliseconds(),
            "server time sample recorded"
        );
        *self.sample.write().unwrap_or_else(|e| e.into_inner()) = Some(sample);
    }

    /// Records a server timestamp received right now.
    pub fn observe(&self, server_now: DateTime<Utc>) {
        self.record(ServerTimeSample {
            local_receipt: self.clock.now(),
            server_reported: server_now,
        });
    }

    /// The latest sample, if any.
    pub fn sample(&self) -> Option<ServerTimeSample> {
        *self.sample.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Current offset. Zero until a sample has been recorded.
    pub fn offset(&self) -> TimeDelta {
        self.sample()
            .map(|s| s.offset())
            .unwrap_or_else(TimeDelta::zero)
    }

    /// The unadjusted local clock.
    pub fn local_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Estimate of the server's current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now() - self.offset()
    }
}

impl std::fmt::Debug for ClockOffsetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockOffsetTracker")
            .field("sample", &self.sample())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock::anchored_at(t0());
        tokio::time::advance(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), t0() + TimeDelta::seconds(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_now_without_sample_is_local_clock() {
        let tracker = ClockOffsetTracker::new(SystemClock::anchored_at(t0()));
        assert_eq!(tracker.offset(), TimeDelta::zero());
        assert_eq!(tracker.now(), tracker.local_now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_behind_local_shifts_now_earlier() {
        let tracker = ClockOffsetTracker::new(SystemClock::anchored_at(t0()));
        tracker.observe(t0() - TimeDelta::seconds(5));

        assert_eq!(tracker.offset(), TimeDelta::seconds(5));
        assert_eq!(tracker.now(), tracker.local_now() - TimeDelta::seconds(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_sample_replaces_previous() {
        let tracker = ClockOffsetTracker::new(SystemClock::anchored_at(t0()));
        tracker.observe(t0() - TimeDelta::seconds(5));
        tracker.observe(t0() + TimeDelta::seconds(2));

        assert_eq!(tracker.offset(), TimeDelta::seconds(-2));
        assert_eq!(tracker.now(), t0() + TimeDelta::seconds(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_sample() {
        let tracker = ClockOffsetTracker::new(SystemClock::anchored_at(t0()));
        let other = tracker.clone();
        tracker.observe(t0() - TimeDelta::seconds(3));
        assert_eq!(other.offset(), TimeDelta::seconds(3));
    }
}
