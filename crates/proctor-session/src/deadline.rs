//! Effective deadline of a session.

use chrono::{DateTime, Utc};
use proctor_protocol::SessionMeta;

/// Computes the single instant at which a session must end.
///
/// Two sources can bound a session: its granted duration and the hard
/// cutoff of the time slot it runs in. The earlier one wins, unless the
/// session is exempt from the slot cutoff.
pub struct DeadlineResolver;

impl DeadlineResolver {
    /// Returns the effective deadline, or `None` for an untimed session
    /// (no duration, or a zero duration).
    ///
    /// An untimed session has no countdown at all; a slot cutoff alone
    /// does not make it timed.
    pub fn resolve(meta: &SessionMeta) -> Option<DateTime<Utc>> {
        let duration_end = meta.started_at + meta.duration()?;
        match meta.schedule_end_at {
            Some(cutoff) if !meta.ignore_schedule_end => Some(duration_end.min(cutoff)),
            _ => Some(duration_end),
        }
    }
}
