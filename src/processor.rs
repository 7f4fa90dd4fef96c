//! Batch Processor: drives one completion call and one persistence write per
//! document, strictly in order, isolating per-item failures.

use crate::completion::CompletionClient;
use crate::document::{BatchId, Document, ItemStatus, ModelId, RunState};
use crate::error::{DistillError, Result};
use crate::persistence::PersistenceGateway;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Stored in place of an empty or absent completion.
pub const NO_RESPONSE_FALLBACK: &str = "No response from AI";

/// Inline error stored as a document's processed content when its completion fails.
pub fn error_marker(message: &str) -> String {
    format!("Error: Failed to process file - {}", message)
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub batch_id: BatchId,
    pub total: usize,
    pub saved: usize,
    pub unsaved: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    /// Persistence failures, one line per affected document
    pub diagnostics: Vec<String>,
}

impl RunReport {
    fn new(batch_id: BatchId, total: usize) -> Self {
        Self {
            batch_id,
            total,
            saved: 0,
            unsaved: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            diagnostics: Vec::new(),
        }
    }
}

/// Sequential batch runner. One run at a time per processor; a second `run`
/// while one is active is refused with [`DistillError::RunInProgress`].
pub struct BatchProcessor {
    completion: Arc<dyn CompletionClient>,
    store: Arc<dyn PersistenceGateway>,
    state: watch::Sender<RunState>,
    running: AtomicBool,
    last_batch_ms: Mutex<i64>,
}

/// Releases the run slot and clears `is_processing`, also when the run
/// future is dropped mid-way.
struct RunGuard<'a> {
    processor: &'a BatchProcessor,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.processor.state.send_modify(|s| s.is_processing = false);
        self.processor.running.store(false, Ordering::Release);
    }
}

impl BatchProcessor {
    pub fn new(completion: Arc<dyn CompletionClient>, store: Arc<dyn PersistenceGateway>) -> Self {
        let (state, _) = watch::channel(RunState::default());
        Self {
            completion,
            store,
            state,
            running: AtomicBool::new(false),
            last_batch_ms: Mutex::new(i64::MIN),
        }
    }

    /// Observe run state changes
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Snapshot of the current run state
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear progress and the error banner. Ignored while a run is active.
    pub fn reset_state(&self) {
        if !self.is_processing() {
            self.state.send_replace(RunState::default());
        }
    }

    /// Clear the error banner only
    pub fn dismiss_error(&self) {
        self.state.send_modify(|s| s.last_error = None);
    }

    /// Fresh batch id from the wall clock. Ids from this processor strictly
    /// increase even when two runs start within the same millisecond.
    pub fn next_batch_id(&self) -> BatchId {
        let now_ms = Utc::now().timestamp_millis();
        let mut last = self
            .last_batch_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ms = now_ms.max(last.saturating_add(1));
        *last = ms;

        let at = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now);
        BatchId::from_datetime(at)
    }

    /// Guard for starting a run: non-blank instruction and model, at least one document.
    pub fn check_preconditions(documents: &[Document], instruction: &str, model: &ModelId) -> Result<()> {
        if instruction.trim().is_empty() {
            return Err(DistillError::Precondition("instruction is empty".to_string()));
        }
        if model.is_blank() {
            return Err(DistillError::Precondition("no model selected".to_string()));
        }
        if documents.is_empty() {
            return Err(DistillError::Precondition("no documents to process".to_string()));
        }
        Ok(())
    }

    /// Process `documents` in order, setting `processed_content` and `status`
    /// on each in place.
    ///
    /// Completion failures are recorded into the failing document and the
    /// run moves on. Persistence failures keep the completion result in
    /// memory and are reported through `last_error` and the report
    /// diagnostics. `cancel` is checked before each document; an in-flight
    /// document always settles. Nothing is retried.
    pub async fn run(
        &self,
        documents: &mut [Document],
        instruction: &str,
        model: &ModelId,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        Self::check_preconditions(documents, instruction, model)?;

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DistillError::RunInProgress);
        }
        let _guard = RunGuard { processor: self };

        let batch_id = self.next_batch_id();
        self.state.send_replace(RunState {
            is_processing: true,
            progress_percent: 0.0,
            last_error: None,
        });

        // Output from an earlier run never leaks into this one
        for document in documents.iter_mut() {
            document.processed_content = None;
            document.status = ItemStatus::Pending;
        }

        let total = documents.len();
        let mut report = RunReport::new(batch_id.clone(), total);
        let mut written: HashSet<String> = HashSet::new();
        let start = Instant::now();

        log::info!("Batch {}: {} document(s) with model {}", batch_id, total, model);

        for (idx, document) in documents.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                document.status = ItemStatus::Skipped;
                report.skipped += 1;
                report.cancelled = true;
                continue;
            }

            log::info!("[{}/{}] Processing: {}", idx + 1, total, document.name);

            match self
                .completion
                .complete(model, &document.content, instruction)
                .await
            {
                Ok(text) => {
                    let text = if text.is_empty() {
                        NO_RESPONSE_FALLBACK.to_string()
                    } else {
                        text
                    };
                    let filename = document.output_filename();
                    if !written.insert(filename.clone()) {
                        log::warn!(
                            "{} maps to {} which this batch already wrote; the earlier file is overwritten",
                            document.name,
                            filename
                        );
                    }

                    match self.store.store(batch_id.as_str(), &filename, &text).await {
                        Ok(path) => {
                            document.status = ItemStatus::Saved;
                            report.saved += 1;
                            log::info!("✓ {} -> {}", document.name, path.display());
                        }
                        Err(e) => {
                            let diagnostic = format!("Failed to save {}: {}", filename, e);
                            log::error!("✗ {}", diagnostic);
                            document.status = ItemStatus::Unsaved;
                            report.unsaved += 1;
                            self.state
                                .send_modify(|s| s.last_error = Some(diagnostic.clone()));
                            report.diagnostics.push(diagnostic);
                        }
                    }
                    document.processed_content = Some(text);
                }
                Err(e) => {
                    log::error!("✗ {}: {}", document.name, e);
                    document.processed_content = Some(error_marker(&e.to_string()));
                    document.status = ItemStatus::Failed;
                    report.failed += 1;
                }
            }

            let progress = (idx + 1) as f64 / total as f64 * 100.0;
            self.state.send_modify(|s| s.progress_percent = progress);
        }

        if report.cancelled {
            log::warn!("Batch {} cancelled, {} document(s) skipped", batch_id, report.skipped);
        }
        log::info!(
            "Batch {} finished in {:?}: saved={}, unsaved={}, failed={}",
            batch_id,
            start.elapsed(),
            report.saved,
            report.unsaved,
            report.failed
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FsStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Uppercases the body unless told to fail or stay silent on it.
    #[derive(Default)]
    struct FakeCompletion {
        fail_on: HashMap<String, String>,
        silent_on: Vec<String>,
        calls: Mutex<Vec<(String, String, String)>>,
        observer: Mutex<Option<watch::Receiver<RunState>>>,
        progress_seen: Mutex<Vec<f64>>,
        cancel_after_first: Option<CancellationToken>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl CompletionClient for FakeCompletion {
        async fn complete(&self, model: &ModelId, body: &str, instruction: &str) -> Result<String> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(rx) = self.observer.lock().unwrap().as_ref() {
                self.progress_seen.lock().unwrap().push(rx.borrow().progress_percent);
            }
            self.calls.lock().unwrap().push((
                model.to_string(),
                body.to_string(),
                instruction.to_string(),
            ));
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            if let Some(msg) = self.fail_on.get(body) {
                return Err(DistillError::Remote(msg.clone()));
            }
            if self.silent_on.iter().any(|b| b == body) {
                return Ok(String::new());
            }
            Ok(body.to_uppercase())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        fail_on: Option<String>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl PersistenceGateway for RecordingStore {
        async fn store(&self, batch_id: &str, filename: &str, content: &str) -> Result<PathBuf> {
            self.calls.lock().unwrap().push((
                batch_id.to_string(),
                filename.to_string(),
                content.to_string(),
            ));
            if self.fail_on.as_deref() == Some(filename) {
                return Err(DistillError::Storage("disk full".to_string()));
            }
            Ok(PathBuf::from(batch_id).join(filename))
        }
    }

    fn processor(completion: Arc<FakeCompletion>, store: Arc<RecordingStore>) -> BatchProcessor {
        BatchProcessor::new(completion, store)
    }

    fn docs(items: &[(&str, &str)]) -> Vec<Document> {
        items.iter().map(|(n, c)| Document::new(*n, *c)).collect()
    }

    #[tokio::test]
    async fn test_single_document_round() {
        let completion = Arc::new(FakeCompletion::default());
        let store = Arc::new(RecordingStore::default());
        let p = processor(completion.clone(), store.clone());
        let mut documents = docs(&[("a.md", "hello")]);

        let report = p
            .run(&mut documents, "uppercase it", &ModelId::from("model-a"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(documents[0].name, "a.md");
        assert_eq!(documents[0].content, "hello");
        assert_eq!(documents[0].processed_content.as_deref(), Some("HELLO"));
        assert_eq!(documents[0].status, ItemStatus::Saved);

        let calls = completion.calls.lock().unwrap();
        assert_eq!(calls[0], ("model-a".to_string(), "hello".to_string(), "uppercase it".to_string()));

        let stored = store.calls.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, report.batch_id.as_str());
        assert_eq!(stored[0].1, "a_processed.txt");
        assert_eq!(stored[0].2, "HELLO");

        assert_eq!(report.saved, 1);
        let state = p.state();
        assert!(!state.is_processing);
        assert_eq!(state.progress_percent, 100.0);
        assert_eq!(state.last_error, None);
    }

    #[tokio::test]
    async fn test_completion_failure_is_isolated() {
        let completion = Arc::new(FakeCompletion {
            fail_on: HashMap::from([("first".to_string(), "rate limited".to_string())]),
            ..Default::default()
        });
        let store = Arc::new(RecordingStore::default());
        let p = processor(completion.clone(), store.clone());
        let mut documents = docs(&[("one.txt", "first"), ("two.txt", "second")]);

        let report = p
            .run(&mut documents, "shout", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();

        let marker = documents[0].processed_content.as_deref().unwrap();
        assert!(marker.contains("rate limited"));
        assert_eq!(marker, error_marker("rate limited"));
        assert_eq!(documents[0].status, ItemStatus::Failed);
        assert_eq!(documents[1].processed_content.as_deref(), Some("SECOND"));
        assert_eq!(documents[1].status, ItemStatus::Saved);

        // Failed items are never persisted
        let stored = store.calls.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1, "two_processed.txt");

        assert_eq!(report.failed, 1);
        assert_eq!(report.saved, 1);
        assert_eq!(p.state().progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_output_keeps_length_names_and_order() {
        let completion = Arc::new(FakeCompletion {
            fail_on: HashMap::from([("b".to_string(), "boom".to_string())]),
            ..Default::default()
        });
        let p = processor(completion, Arc::new(RecordingStore::default()));
        let mut documents = docs(&[("3.txt", "c"), ("1.txt", "a"), ("2.txt", "b"), ("0.txt", "d")]);

        p.run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["3.txt", "1.txt", "2.txt", "0.txt"]);
        assert!(documents.iter().all(|d| d.processed_content.is_some()));
    }

    #[tokio::test]
    async fn test_progress_counts_attempted_items() {
        let completion = Arc::new(FakeCompletion {
            fail_on: HashMap::from([("b".to_string(), "boom".to_string())]),
            ..Default::default()
        });
        let p = processor(completion.clone(), Arc::new(RecordingStore::default()));
        *completion.observer.lock().unwrap() = Some(p.subscribe());
        let mut documents = docs(&[("a", "a"), ("b", "b"), ("c", "c")]);

        p.run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();

        // Progress seen when item i starts equals the share of items already attempted
        let seen = completion.progress_seen.lock().unwrap().clone();
        let expected: Vec<f64> = (0..3).map(|i| i as f64 / 3.0 * 100.0).collect();
        assert_eq!(seen, expected);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(p.state().progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_preconditions_block_all_calls() {
        let completion = Arc::new(FakeCompletion::default());
        let store = Arc::new(RecordingStore::default());
        let p = processor(completion.clone(), store.clone());
        let cancel = CancellationToken::new();

        let mut documents = docs(&[("a.md", "hello")]);
        let err = p
            .run(&mut documents, "   ", &ModelId::from("m"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DistillError::Precondition(_)));

        let err = p
            .run(&mut documents, "x", &ModelId::from(""), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DistillError::Precondition(_)));

        let err = p
            .run(&mut [], "x", &ModelId::from("m"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DistillError::Precondition(_)));

        assert!(completion.calls.lock().unwrap().is_empty());
        assert!(store.calls.lock().unwrap().is_empty());
        assert_eq!(documents[0].processed_content, None);
        assert!(!p.state().is_processing);
    }

    #[tokio::test]
    async fn test_consecutive_runs_use_distinct_namespaces() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FsStore::new(temp_dir.path(), "distill-"));
        let p = BatchProcessor::new(Arc::new(FakeCompletion::default()), store.clone());
        let cancel = CancellationToken::new();

        let mut first = docs(&[("a.md", "one")]);
        let mut second = docs(&[("a.md", "two")]);
        let r1 = p.run(&mut first, "x", &ModelId::from("m"), &cancel).await.unwrap();
        let r2 = p.run(&mut second, "x", &ModelId::from("m"), &cancel).await.unwrap();

        assert_ne!(r1.batch_id, r2.batch_id);
        assert!(r1.batch_id < r2.batch_id);
        let one = store.batch_dir(r1.batch_id.as_str()).join("a_processed.txt");
        let two = store.batch_dir(r2.batch_id.as_str()).join("a_processed.txt");
        assert_eq!(std::fs::read_to_string(one).unwrap(), "ONE");
        assert_eq!(std::fs::read_to_string(two).unwrap(), "TWO");
    }

    #[test]
    fn test_batch_ids_strictly_increase() {
        let p = processor(
            Arc::new(FakeCompletion::default()),
            Arc::new(RecordingStore::default()),
        );
        let ids: Vec<BatchId> = (0..50).map(|_| p.next_batch_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_empty_completion_uses_fallback() {
        let completion = Arc::new(FakeCompletion {
            silent_on: vec!["quiet".to_string()],
            ..Default::default()
        });
        let store = Arc::new(RecordingStore::default());
        let p = processor(completion, store.clone());
        let mut documents = docs(&[("q.txt", "quiet")]);

        p.run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(documents[0].processed_content.as_deref(), Some(NO_RESPONSE_FALLBACK));
        assert_eq!(documents[0].status, ItemStatus::Saved);
        assert_eq!(store.calls.lock().unwrap()[0].2, NO_RESPONSE_FALLBACK);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_result_and_reports() {
        let store = Arc::new(RecordingStore {
            fail_on: Some("a_processed.txt".to_string()),
            ..Default::default()
        });
        let p = processor(Arc::new(FakeCompletion::default()), store.clone());
        let mut documents = docs(&[("a.md", "one"), ("b.md", "two")]);

        let report = p
            .run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(documents[0].processed_content.as_deref(), Some("ONE"));
        assert_eq!(documents[0].status, ItemStatus::Unsaved);
        assert_eq!(documents[1].status, ItemStatus::Saved);
        assert_eq!(store.calls.lock().unwrap().len(), 2, "no re-attempt");

        assert_eq!(report.unsaved, 1);
        assert_eq!(report.diagnostics.len(), 1);
        let state = p.state();
        assert!(state.last_error.unwrap().contains("a_processed.txt"));
        assert_eq!(state.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_cancel_stops_between_items() {
        let cancel = CancellationToken::new();
        let completion = Arc::new(FakeCompletion {
            cancel_after_first: Some(cancel.clone()),
            ..Default::default()
        });
        let store = Arc::new(RecordingStore::default());
        let p = processor(completion.clone(), store.clone());
        let mut documents = docs(&[("a", "a"), ("b", "b"), ("c", "c")]);

        let report = p
            .run(&mut documents, "x", &ModelId::from("m"), &cancel)
            .await
            .unwrap();

        // The in-flight item settles fully, the rest are skipped
        assert_eq!(documents[0].status, ItemStatus::Saved);
        assert_eq!(store.calls.lock().unwrap().len(), 1);
        assert_eq!(documents[1].status, ItemStatus::Skipped);
        assert_eq!(documents[2].processed_content, None);
        assert!(report.cancelled);
        assert_eq!(report.skipped, 2);
        assert!(!p.state().is_processing);
    }

    #[tokio::test]
    async fn test_whitespace_completion_is_kept_verbatim() {
        let completion = Arc::new(FakeCompletion::default());
        let store = Arc::new(RecordingStore::default());
        let p = processor(completion, store.clone());
        // The fake uppercases the body, so whitespace comes back unchanged
        let mut documents = docs(&[("nl.txt", "\n"), ("sp.txt", "  ")]);

        p.run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(documents[0].processed_content.as_deref(), Some("\n"));
        assert_eq!(documents[1].processed_content.as_deref(), Some("  "));
        let stored = store.calls.lock().unwrap();
        assert_eq!(stored[0].2, "\n");
        assert_eq!(stored[1].2, "  ");
    }

    #[tokio::test]
    async fn test_cancelled_rerun_clears_earlier_output() {
        let p = processor(
            Arc::new(FakeCompletion::default()),
            Arc::new(RecordingStore::default()),
        );
        let mut documents = docs(&[("a", "a"), ("b", "b")]);

        p.run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(documents[0].processed_content.as_deref(), Some("A"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = p
            .run(&mut documents, "x", &ModelId::from("m"), &cancel)
            .await
            .unwrap();

        assert_eq!(report.skipped, 2);
        for doc in &documents {
            assert_eq!(doc.status, ItemStatus::Skipped);
            assert_eq!(doc.processed_content, None);
        }
    }

    #[tokio::test]
    async fn test_colliding_output_names_last_write_wins() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FsStore::new(temp_dir.path(), "distill-"));
        let p = BatchProcessor::new(Arc::new(FakeCompletion::default()), store.clone());
        let mut documents = docs(&[("a.md", "markdown"), ("a.txt", "text")]);

        let report = p
            .run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.saved, 2);
        let dir = store.batch_dir(report.batch_id.as_str());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
        assert_eq!(std::fs::read_to_string(dir.join("a_processed.txt")).unwrap(), "TEXT");
    }

    #[tokio::test]
    async fn test_second_run_refused_while_active() {
        let gate = Arc::new(Notify::new());
        let completion = Arc::new(FakeCompletion {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let p = Arc::new(processor(completion, Arc::new(RecordingStore::default())));

        let background = {
            let p = p.clone();
            tokio::spawn(async move {
                let mut documents = docs(&[("a", "a")]);
                p.run(&mut documents, "x", &ModelId::from("m"), &CancellationToken::new())
                    .await
            })
        };

        while !p.is_processing() {
            tokio::task::yield_now().await;
        }
        assert!(p.state().is_processing);

        let mut other = docs(&[("b", "b")]);
        let err = p
            .run(&mut other, "x", &ModelId::from("m"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DistillError::RunInProgress));
        assert_eq!(other[0].processed_content, None);

        gate.notify_one();
        let report = background.await.unwrap().unwrap();
        assert_eq!(report.saved, 1);
        assert!(!p.is_processing());
    }
}
