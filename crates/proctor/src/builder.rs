//! `Proctor` builder and session loader.
//!
//! This is the entry point for running assessment sessions. It ties
//! together all the layers: protocol → tick → session → drafts → runtime.

use std::sync::Arc;
use std::time::Duration;

use proctor_drafts::{DraftStore, DurableStore, SessionKey};
use proctor_protocol::{QuestionId, SessionId};
use proctor_runtime::{spawn_session, RuntimeConfig, SessionHandle};
use proctor_session::{ClientError, FinishObserver, RetryPolicy, SessionClient};
use proctor_tick::{Clock, ClockOffsetTracker, SystemClock};
use tracing::info;

use crate::ProctorError;

/// Builder for configuring a [`Proctor`].
///
/// # Example
///
/// ```rust,ignore
/// use proctor::prelude::*;
///
/// let proctor = Proctor::builder()
///     .poll_interval(Duration::from_secs(30))
///     .on_finished(|v: &Verdict| println!("session over: {}", v.status))
///     .build(my_client, FileStore::new("/var/lib/proctor"));
///
/// let session = proctor.load(SessionId(42), starters).await?;
/// ```
pub struct ProctorBuilder {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn FinishObserver>>,
}

impl ProctorBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            clock: Arc::new(SystemClock::new()),
            observers: Vec::new(),
        }
    }

    /// Replaces the whole runtime configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how often the server is polled for out-of-band changes.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets the countdown tick period.
    pub fn countdown_period(mut self, period: Duration) -> Self {
        self.config.countdown_period = period;
        self
    }

    /// Sets the finalize retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sets the durable-store key prefix for drafts.
    pub fn draft_key_prefix(mut self, prefix: &str) -> Self {
        self.config.draft_key_prefix = prefix.to_string();
        self
    }

    /// Whether drafts are deleted from the durable store once a session
    /// finishes.
    pub fn clear_drafts_on_finish(mut self, clear: bool) -> Self {
        self.config.clear_drafts_on_finish = clear;
        self
    }

    /// Sets the local clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Registers an observer told the verdict of every loaded session.
    pub fn on_finished(mut self, observer: impl FinishObserver) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Builds the loader around the host's server client and draft store.
    pub fn build<C: SessionClient, S: DurableStore>(self, client: C, store: S) -> Proctor<C, S> {
        Proctor {
            client: Arc::new(client),
            store: Arc::new(store),
            config: self.config.validated(),
            clock: self.clock,
            observers: self.observers,
        }
    }
}

impl Default for ProctorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads sessions and starts their runtimes.
pub struct Proctor<C: SessionClient, S: DurableStore> {
    client: Arc<C>,
    store: Arc<S>,
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn FinishObserver>>,
}

impl<C: SessionClient, S: DurableStore> Proctor<C, S> {
    /// Creates a new builder.
    pub fn builder() -> ProctorBuilder {
        ProctorBuilder::new()
    }

    /// The validated runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Loads a session and starts its runtime.
    ///
    /// Fetches the session (seeding the clock offset from the response),
    /// merges `starters` with any drafts left on this device, then spawns
    /// the session actor. A session the server already concluded finishes
    /// right away; an untimed one runs without a countdown.
    ///
    /// # Errors
    /// [`ProctorError::Client`] if the session can't be fetched, or the
    /// server answers with a different session.
    pub async fn load(
        &self,
        session_id: SessionId,
        starters: impl IntoIterator<Item = (QuestionId, String)>,
    ) -> Result<SessionHandle, ProctorError> {
        let snapshot = self.client.fetch_session(session_id).await?;
        let tracker = ClockOffsetTracker::from_shared(Arc::clone(&self.clock));
        // Sampled on receipt; draft loading below may take a while.
        tracker.observe(snapshot.server_now);

        if snapshot.session.session_id != session_id {
            return Err(ClientError::Malformed(format!(
                "asked for session {session_id}, server answered with {}",
                snapshot.session.session_id
            ))
            .into());
        }

        let key = SessionKey::new(&self.config.draft_key_prefix, session_id);
        let drafts = DraftStore::load(Arc::clone(&self.store), key, starters).await;

        info!(
            %session_id,
            status = %snapshot.session.status,
            duration_minutes = ?snapshot.session.duration_minutes,
            questions = drafts.drafts().len(),
            "session loaded"
        );

        Ok(spawn_session(
            Arc::clone(&self.client),
            snapshot,
            tracker,
            drafts,
            self.config.clone(),
            self.observers.clone(),
        ))
    }
}
