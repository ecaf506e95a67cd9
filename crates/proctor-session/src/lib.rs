//! Session lifecycle for Proctor.
//!
//! This crate decides *when* a test session ends and makes sure it ends
//! exactly once:
//!
//! 1. **Server access**: the [`SessionClient`] trait: fetch, finish,
//!    execute. Proctor doesn't implement transport; the host application
//!    does.
//! 2. **Deadlines**: [`DeadlineResolver`] turns a [`SessionMeta`] into
//!    one authoritative expiry instant (or none, for untimed sessions).
//! 3. **Lifecycle**: [`LifecycleCoordinator`] owns the
//!    `Running → FinishPending → Finished` state machine. Expiry, a
//!    terminal status seen by the poller, and the participant's own
//!    "finish" all funnel into [`LifecycleCoordinator::request_finish`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Runtime (above)  ← session actor: countdown, poller, user commands
//!     ↕
//! Session layer (this crate)  ← deadlines and the finish guard
//!     ↕
//! Protocol + Tick (below)  ← SessionMeta, clock offset, stop handles
//! ```
//!
//! [`SessionMeta`]: proctor_protocol::SessionMeta

mod client;
mod coordinator;
mod deadline;
mod error;
mod lifecycle;
mod retry;

pub use client::SessionClient;
pub use coordinator::LifecycleCoordinator;
pub use deadline::DeadlineResolver;
pub use error::{ClientError, SessionError};
pub use lifecycle::{FinishObserver, FinishOutcome, FinishReason, LifecycleState, Verdict};
pub use retry::RetryPolicy;
