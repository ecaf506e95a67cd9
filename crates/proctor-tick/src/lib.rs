//! Time-keeping for Proctor sessions.
//!
//! Three pieces, leaves first:
//!
//! - [`Ticker`]: a fixed-period tick scheduler with an explicit
//!   [`StopHandle`]. Both the 1 Hz countdown and the 30 s reconciliation
//!   poll run on one.
//! - [`ClockOffsetTracker`]: translates local "now" into the server's
//!   "now" using the most recent [`ServerTimeSample`].
//! - [`CountdownScheduler`]: derives remaining time from a deadline and
//!   the tracker, and raises [`CountdownEvent::Expired`] exactly once.
//!
//! # Integration
//!
//! Tickers are designed to sit inside a session actor's `tokio::select!`
//! loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         event = countdown.next_event() => {
//!             if let CountdownEvent::Expired = event {
//!                 /* request finish */
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! A stopped ticker pends forever, so its `select!` branch simply goes
//! quiet instead of needing to be removed.

mod clock;
mod countdown;
mod ticker;

pub use clock::{Clock, ClockOffsetTracker, ServerTimeSample, SystemClock};
pub use countdown::{
    format_remaining, CountdownEvent, CountdownScheduler, CountdownState,
};
pub use ticker::{StopHandle, TickConfig, TickInfo, TickMetrics, TickPolicy, Ticker};
