//! The draft store: in-memory drafts plus a write-behind task.
//!
//! Edits land in memory synchronously and the full snapshot is handed to
//! a writer task over a channel. The writer drains everything queued
//! before each write, so a burst of keystrokes costs one store write, not
//! one per keystroke. `flush()` and `clear()` are ordered behind any
//! queued snapshot.

use std::sync::Arc;

use proctor_protocol::{Codec, JsonCodec, QuestionId, TestCaseId, TestOutcome};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{merge_drafts, DraftError, Drafts, DurableStore, QuestionDraft, SessionKey};

/// Commands for the writer task.
enum WriterCommand {
    /// Persist this encoded snapshot (supersedes any earlier one).
    Write(Vec<u8>),
    /// Reply once everything queued before it is written.
    Flush(oneshot::Sender<()>),
    /// Drop queued snapshots and delete the stored blob.
    Clear(oneshot::Sender<()>),
}

/// In-progress drafts of one session.
///
/// Owned by the session actor; not `Clone`. Every mutation schedules a
/// durable write. Storage failures are logged and otherwise ignored.
pub struct DraftStore {
    key: SessionKey,
    drafts: Drafts,
    codec: JsonCodec,
    writer: mpsc::UnboundedSender<WriterCommand>,
}

impl DraftStore {
    /// Loads the session's drafts, merging durable edits over `starters`,
    /// and starts the writer task.
    ///
    /// A durable draft for a question wins over its starter code. A
    /// missing or unreadable blob is not an error: the starters are used.
    ///
    /// Must be called from inside a Tokio runtime.
    pub async fn load<S: DurableStore>(
        store: Arc<S>,
        key: SessionKey,
        starters: impl IntoIterator<Item = (QuestionId, String)>,
    ) -> Self {
        let codec = JsonCodec;
        let durable = match read_drafts(store.as_ref(), &key, &codec).await {
            Ok(durable) => durable,
            Err(e) => {
                warn!(%key, error = %e, "stored drafts unreadable, using starters");
                Drafts::new()
            }
        };
        let restored = durable.len();
        let drafts = merge_drafts(starters, durable);
        debug!(%key, questions = drafts.len(), restored, "drafts loaded");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, key.clone(), rx));

        Self {
            key,
            drafts,
            codec,
            writer: tx,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The draft for `question`, if the session has that question.
    pub fn get(&self, question: QuestionId) -> Option<&QuestionDraft> {
        self.drafts.get(&question)
    }

    /// All drafts.
    pub fn drafts(&self) -> &Drafts {
        &self.drafts
    }

    /// Replaces the code of `question` and schedules a durable write.
    ///
    /// An edit to a question that wasn't loaded creates its draft.
    pub fn update(&mut self, question: QuestionId, code: impl Into<String>) {
        self.drafts.entry(question).or_default().code = code.into();
        self.schedule_write();
    }

    /// Records one test case's outcome for `question`. The code is left
    /// untouched. Ignored (with a warning) for an unknown question.
    pub fn record_test_outcome(
        &mut self,
        question: QuestionId,
        test_case: TestCaseId,
        outcome: TestOutcome,
    ) {
        let Some(draft) = self.drafts.get_mut(&question) else {
            warn!(key = %self.key, %question, "test outcome for unknown question, ignoring");
            return;
        };
        draft.last_test_results.insert(test_case, outcome);
        self.schedule_write();
    }

    /// Records a whole execution report with a single durable write.
    pub fn record_test_outcomes(
        &mut self,
        question: QuestionId,
        outcomes: impl IntoIterator<Item = (TestCaseId, TestOutcome)>,
    ) {
        let Some(draft) = self.drafts.get_mut(&question) else {
            warn!(key = %self.key, %question, "test outcomes for unknown question, ignoring");
            return;
        };
        draft.last_test_results.extend(outcomes);
        self.schedule_write();
    }

    /// Waits until every edit made so far has reached the store (or
    /// failed to, which is logged).
    ///
    /// # Errors
    /// [`DraftError::WriterClosed`] if the writer task is gone.
    pub async fn flush(&self) -> Result<(), DraftError> {
        let (tx, rx) = oneshot::channel();
        self.writer
            .send(WriterCommand::Flush(tx))
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Deletes the session's durable drafts once any queued write has
    /// been dropped. The in-memory drafts stay readable.
    ///
    /// # Errors
    /// [`DraftError::WriterClosed`] if the writer task is gone.
    pub async fn clear(&self) -> Result<(), DraftError> {
        let (tx, rx) = oneshot::channel();
        self.writer
            .send(WriterCommand::Clear(tx))
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    fn schedule_write(&self) {
        let blob = match self.codec.encode(&self.drafts) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(key = %self.key, error = %e, "drafts could not be encoded");
                return;
            }
        };
        if self.writer.send(WriterCommand::Write(blob)).is_err() {
            warn!(key = %self.key, "draft writer stopped, edit kept in memory only");
        }
    }

    fn closed(&self) -> DraftError {
        DraftError::WriterClosed(self.key.to_string())
    }
}

async fn read_drafts<S: DurableStore>(
    store: &S,
    key: &SessionKey,
    codec: &JsonCodec,
) -> Result<Drafts, DraftError> {
    match store.get(key.as_str()).await? {
        Some(blob) => Ok(codec.decode(&blob)?),
        None => Ok(Drafts::new()),
    }
}

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

/// Persists snapshots until every [`DraftStore`] sender is dropped.
async fn run_writer<S: DurableStore>(
    store: Arc<S>,
    key: SessionKey,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    debug!(%key, "draft writer started");

    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(cmd) = rx.try_recv() {
            batch.push(cmd);
        }

        let mut pending: Option<Vec<u8>> = None;
        let mut coalesced = 0usize;
        for cmd in batch {
            match cmd {
                WriterCommand::Write(blob) => {
                    if pending.replace(blob).is_some() {
                        coalesced += 1;
                    }
                }
                WriterCommand::Flush(reply) => {
                    if let Some(blob) = pending.take() {
                        write(store.as_ref(), &key, blob).await;
                    }
                    let _ = reply.send(());
                }
                WriterCommand::Clear(reply) => {
                    if pending.take().is_some() {
                        coalesced += 1;
                    }
                    match store.remove(key.as_str()).await {
                        Ok(()) => info!(%key, "durable drafts cleared"),
                        Err(e) => warn!(%key, error = %e, "durable drafts could not be cleared"),
                    }
                    let _ = reply.send(());
                }
            }
        }
        if let Some(blob) = pending {
            write(store.as_ref(), &key, blob).await;
        }
        if coalesced > 0 {
            debug!(%key, coalesced, "superseded draft writes skipped");
        }
    }

    debug!(%key, "draft writer stopped");
}

async fn write<S: DurableStore>(store: &S, key: &SessionKey, blob: Vec<u8>) {
    if let Err(e) = store.set(key.as_str(), blob).await {
        warn!(%key, error = %e, "draft write failed, will retry on next edit");
    }
}
