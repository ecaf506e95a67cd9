//! Runtime configuration.

use std::time::Duration;

use proctor_session::RetryPolicy;
use proctor_tick::TickConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings for one session runtime.
///
/// The defaults match what the portal expects: a once-per-second
/// countdown and a reconciliation poll every 30 seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Countdown tick period.
    pub countdown_period: Duration,

    /// How often the server is polled for out-of-band changes.
    pub poll_interval: Duration,

    /// Backoff for the finalize step.
    pub retry: RetryPolicy,

    /// Capacity of the session actor's command channel.
    pub command_channel_size: usize,

    /// Prefix of the durable-store key holding a session's drafts.
    pub draft_key_prefix: String,

    /// Delete the durable drafts once the session has finished.
    pub clear_drafts_on_finish: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            countdown_period: Duration::from_secs(1),
            poll_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            command_channel_size: 64,
            draft_key_prefix: "proctor.drafts.".to_string(),
            clear_drafts_on_finish: true,
        }
    }
}

impl RuntimeConfig {
    /// Shortest poll interval accepted; anything faster hammers the server.
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Clamp out-of-range values so the runtime can't be misconfigured
    /// into a panic or a busy loop.
    pub fn validated(mut self) -> Self {
        if self.poll_interval < Self::MIN_POLL_INTERVAL {
            warn!(
                poll_interval_ms = self.poll_interval.as_millis() as u64,
                "poll interval too short, clamping to 1s"
            );
            self.poll_interval = Self::MIN_POLL_INTERVAL;
        }
        if self.command_channel_size == 0 {
            warn!("command channel size is 0, using 1");
            self.command_channel_size = 1;
        }
        self.retry = self.retry.validated();
        self
    }

    /// Tick settings for the countdown.
    pub fn countdown_tick(&self) -> TickConfig {
        TickConfig::every(self.countdown_period).validated()
    }

    /// Tick settings for the reconciliation poller.
    pub fn poll_tick(&self) -> TickConfig {
        TickConfig::every(self.poll_interval).validated()
    }
}
