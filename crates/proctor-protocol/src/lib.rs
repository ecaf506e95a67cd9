//! Data shapes exchanged with the assessment server.
//!
//! This crate defines what the lifecycle subsystem needs to know about the
//! server, and nothing more:
//!
//! - **Types** ([`SessionMeta`], [`SessionStatus`], [`SessionSnapshot`],
//!   [`FinishReport`], [`ExecutionReport`]): the load-bearing fields of
//!   each endpoint. Exact wire shapes beyond these are the transport's job.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how values become bytes,
//!   used by the draft store for its durable blobs.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! # Architecture
//!
//! ```text
//! SessionClient (server calls) → Protocol (SessionMeta, reports) → Session layer
//! ```
//!
//! The protocol layer doesn't know about timers or lifecycles. It only
//! knows what the server says.

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ExecutionReport, FinishReport, FinishSummary, QuestionId, SessionId,
    SessionMeta, SessionSnapshot, SessionStatus, TestCaseId, TestOutcome,
};
