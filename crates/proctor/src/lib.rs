//! # Proctor
//!
//! Session timer and lifecycle reconciliation for timed assessments.
//!
//! A participant's session must end exactly once, whether the countdown
//! runs out, an administrator ends it on the server, or the participant
//! presses "finish", and even though the local clock, the server clock and
//! that administrator can all disagree at any moment. Proctor keeps a
//! drift-corrected countdown, reconciles with the server every 30 seconds,
//! persists code drafts on the device, and funnels every "end now" signal
//! through one idempotent finish.
//!
//! The host application implements [`SessionClient`](proctor_session::SessionClient)
//! over its own transport and picks a [`DurableStore`](proctor_drafts::DurableStore).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proctor::prelude::*;
//!
//! // Implement SessionClient for your server, then:
//! // let proctor = Proctor::builder().build(my_client, MemoryStore::new());
//! // let session = proctor.load(SessionId(42), starters).await?;
//! // let verdict = session.wait_finished().await?;
//! ```

mod builder;
mod error;

pub use builder::{Proctor, ProctorBuilder};
pub use error::ProctorError;

pub use proctor_drafts as drafts;
pub use proctor_protocol as protocol;
pub use proctor_runtime as runtime;
pub use proctor_session as session;
pub use proctor_tick as tick;

/// Installs a `tracing` subscriber that logs to stderr.
///
/// Honors `RUST_LOG` (e.g. `RUST_LOG=proctor_runtime=debug`) and falls
/// back to `info`. Calling it more than once is harmless.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything a host application needs in one import.
pub mod prelude {
    pub use crate::{init_tracing, Proctor, ProctorBuilder, ProctorError};

    pub use proctor_drafts::{DurableStore, FileStore, MemoryStore, QuestionDraft};
    pub use proctor_protocol::{
        ExecutionReport, FinishReport, FinishSummary, QuestionId, SessionId, SessionMeta,
        SessionSnapshot, SessionStatus, TestCaseId, TestOutcome,
    };
    pub use proctor_runtime::{
        Reconciliation, RuntimeConfig, SessionHandle, SessionInfo, SessionVerdict,
    };
    pub use proctor_session::{
        ClientError, FinishReason, LifecycleState, RetryPolicy, SessionClient, Verdict,
    };
    pub use proctor_tick::{format_remaining, CountdownState};
}
