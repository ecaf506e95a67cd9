//! Integration tests for draft loading, merging and write-behind persistence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proctor_drafts::{
    DraftError, DraftStore, Drafts, DurableStore, FileStore, MemoryStore, QuestionDraft,
    SessionKey,
};
use proctor_protocol::{Codec, JsonCodec, QuestionId, SessionId, TestCaseId, TestOutcome};

fn key() -> SessionKey {
    SessionKey::new("proctor.drafts.", SessionId(7))
}

fn starters() -> Vec<(QuestionId, String)> {
    vec![
        (QuestionId(1), "starter".to_string()),
        (QuestionId(2), "fn main() {}".to_string()),
    ]
}

/// Wraps a store and counts writes.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    sets: AtomicUsize,
}

impl DurableStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DraftError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, blob: Vec<u8>) -> Result<(), DraftError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, blob).await
    }

    async fn remove(&self, key: &str) -> Result<(), DraftError> {
        self.inner.remove(key).await
    }
}

/// A store whose disk is full.
struct BrokenStore;

impl DurableStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, DraftError> {
        Err(std::io::Error::other("disk unreadable").into())
    }

    async fn set(&self, _key: &str, _blob: Vec<u8>) -> Result<(), DraftError> {
        Err(std::io::Error::other("disk full").into())
    }

    async fn remove(&self, _key: &str) -> Result<(), DraftError> {
        Err(std::io::Error::other("disk full").into())
    }
}

async fn stored(store: &impl DurableStore) -> Option<Drafts> {
    let blob = store.get(key().as_str()).await.unwrap()?;
    Some(JsonCodec.decode(&blob).unwrap())
}

// =========================================================================
// Load and merge
// =========================================================================

#[tokio::test]
async fn test_load_partial_code_beats_starter() {
    let store = Arc::new(MemoryStore::new());
    let mut earlier: Drafts = Drafts::new();
    earlier.insert(QuestionId(1), QuestionDraft::from_starter("partial code"));
    store
        .set(key().as_str(), JsonCodec.encode(&earlier).unwrap())
        .await
        .unwrap();

    let drafts = DraftStore::load(Arc::clone(&store), key(), starters()).await;

    assert_eq!(drafts.get(QuestionId(1)).unwrap().code, "partial code");
    assert_eq!(drafts.get(QuestionId(2)).unwrap().code, "fn main() {}");
}

#[tokio::test]
async fn test_load_with_empty_store_uses_starters() {
    let store = Arc::new(MemoryStore::new());
    let drafts = DraftStore::load(store, key(), starters()).await;

    assert_eq!(drafts.drafts().len(), 2);
    assert_eq!(drafts.get(QuestionId(1)).unwrap().code, "starter");
}

#[tokio::test]
async fn test_load_with_garbage_blob_uses_starters() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(key().as_str(), b"{not json".to_vec())
        .await
        .unwrap();

    let drafts = DraftStore::load(store, key(), starters()).await;

    assert_eq!(drafts.get(QuestionId(1)).unwrap().code, "starter");
}

#[tokio::test]
async fn test_load_with_failing_store_uses_starters() {
    let drafts = DraftStore::load(Arc::new(BrokenStore), key(), starters()).await;
    assert_eq!(drafts.get(QuestionId(2)).unwrap().code, "fn main() {}");
}

// =========================================================================
// Edits and write-behind
// =========================================================================

#[tokio::test]
async fn test_update_is_persisted_after_flush() {
    let store = Arc::new(MemoryStore::new());
    let mut drafts = DraftStore::load(Arc::clone(&store), key(), starters()).await;

    drafts.update(QuestionId(1), "let x = 1;");
    drafts.flush().await.unwrap();

    let persisted = stored(store.as_ref()).await.unwrap();
    assert_eq!(persisted[&QuestionId(1)].code, "let x = 1;");
}

#[tokio::test]
async fn test_burst_of_edits_coalesces_into_one_write() {
    let store = Arc::new(CountingStore::default());
    let mut drafts = DraftStore::load(Arc::clone(&store), key(), starters()).await;

    for i in 0..5 {
        drafts.update(QuestionId(1), format!("version {i}"));
    }
    drafts.flush().await.unwrap();

    assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    let persisted = stored(&store.inner).await.unwrap();
    assert_eq!(persisted[&QuestionId(1)].code, "version 4");
}

#[tokio::test]
async fn test_record_test_outcome_keeps_code() {
    let store = Arc::new(MemoryStore::new());
    let mut drafts = DraftStore::load(Arc::clone(&store), key(), starters()).await;
    drafts.update(QuestionId(1), "solution");

    drafts.record_test_outcome(QuestionId(1), TestCaseId(3), TestOutcome::Failed);
    drafts.record_test_outcome(QuestionId(1), TestCaseId(3), TestOutcome::Passed);
    drafts.flush().await.unwrap();

    let draft = drafts.get(QuestionId(1)).unwrap();
    assert_eq!(draft.code, "solution");
    assert_eq!(draft.last_test_results[&TestCaseId(3)], TestOutcome::Passed);

    let persisted = stored(store.as_ref()).await.unwrap();
    assert_eq!(persisted[&QuestionId(1)], *draft);
}

#[tokio::test]
async fn test_record_outcome_for_unknown_question_is_ignored() {
    let store = Arc::new(CountingStore::default());
    let mut drafts = DraftStore::load(Arc::clone(&store), key(), starters()).await;

    drafts.record_test_outcome(QuestionId(99), TestCaseId(1), TestOutcome::Passed);
    drafts.flush().await.unwrap();

    assert!(drafts.get(QuestionId(99)).is_none());
    assert_eq!(store.sets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_record_test_outcomes_writes_once() {
    let store = Arc::new(CountingStore::default());
    let mut drafts = DraftStore::load(Arc::clone(&store), key(), starters()).await;

    drafts.record_test_outcomes(
        QuestionId(2),
        [
            (TestCaseId(1), TestOutcome::Passed),
            (TestCaseId(2), TestOutcome::Errored),
        ],
    );
    drafts.flush().await.unwrap();

    assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    assert_eq!(drafts.get(QuestionId(2)).unwrap().last_test_results.len(), 2);
}

#[tokio::test]
async fn test_write_failures_keep_edits_in_memory() {
    let mut drafts = DraftStore::load(Arc::new(BrokenStore), key(), starters()).await;

    drafts.update(QuestionId(1), "typed while offline");
    drafts.flush().await.unwrap();
    drafts.clear().await.unwrap();

    assert_eq!(drafts.get(QuestionId(1)).unwrap().code, "typed while offline");
}

#[tokio::test]
async fn test_clear_drops_pending_write_and_deletes_blob() {
    let store = Arc::new(MemoryStore::new());
    let mut drafts = DraftStore::load(Arc::clone(&store), key(), starters()).await;
    drafts.update(QuestionId(1), "first");
    drafts.flush().await.unwrap();
    assert!(stored(store.as_ref()).await.is_some());

    drafts.update(QuestionId(1), "second");
    drafts.clear().await.unwrap();

    assert!(stored(store.as_ref()).await.is_none());
    assert_eq!(drafts.get(QuestionId(1)).unwrap().code, "second");
}

// =========================================================================
// FileStore
// =========================================================================

#[tokio::test]
async fn test_file_store_drafts_survive_reload() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Arc::new(FileStore::new(dir.path()));
        let mut drafts = DraftStore::load(store, key(), starters()).await;
        drafts.update(QuestionId(2), "partial code");
        drafts.flush().await.unwrap();
    }

    let store = Arc::new(FileStore::new(dir.path()));
    let drafts = DraftStore::load(store, key(), starters()).await;

    assert_eq!(drafts.get(QuestionId(2)).unwrap().code, "partial code");
    assert_eq!(drafts.get(QuestionId(1)).unwrap().code, "starter");
}

#[tokio::test]
async fn test_file_store_missing_key_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("nested"));

    assert_eq!(store.get("absent").await.unwrap(), None);
    store.remove("absent").await.unwrap();

    store.set("k", b"blob".to_vec()).await.unwrap();
    assert!(store.path_for("k").exists());
    assert_eq!(store.get("k").await.unwrap(), Some(b"blob".to_vec()));

    store.remove("k").await.unwrap();
    assert!(!store.path_for("k").exists());
}
