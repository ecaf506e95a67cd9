//! Session runtime for Proctor.
//!
//! Each loaded session runs as an isolated Tokio task (actor model) that
//! owns its countdown, reconciliation poller, drafts and submission
//! tracker, and hands every "end now" signal to the session's
//! [`LifecycleCoordinator`](proctor_session::LifecycleCoordinator).
//!
//! # Key types
//!
//! - [`spawn_session`]: starts the actor for a loaded session
//! - [`SessionHandle`]: send commands to a running session
//! - [`ReconciliationPoller`]: folds server-side changes back in
//! - [`SubmissionTracker`]: per-question test outcomes and verdict
//! - [`RuntimeConfig`]: tick periods, retry policy, draft settings

mod config;
mod error;
mod poller;
mod session;
mod tracker;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use poller::{Reconciliation, ReconciliationPoller};
pub use session::{spawn_session, SessionHandle, SessionInfo};
pub use tracker::{SessionVerdict, SubmissionTracker};
