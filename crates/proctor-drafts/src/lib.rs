//! # proctor-drafts
//!
//! Keeps the participant's in-progress code for every question, merged
//! against the starter code the server hands out at load.
//!
//! - [`DurableStore`]: the per-device key/value store the drafts survive
//!   in ([`MemoryStore`], [`FileStore`]).
//! - [`DraftStore`]: the in-memory drafts of one session plus a
//!   write-behind task that persists them.
//!
//! Storage is best effort. A failed read loads the starters; a failed
//! write is logged and the next edit tries again. Nothing here can end
//! or block a session.

mod cache;
mod draft;
mod error;
mod store;

pub use cache::DraftStore;
pub use draft::{merge_drafts, Drafts, QuestionDraft, SessionKey};
pub use error::DraftError;
pub use store::{DurableStore, FileStore, MemoryStore};
