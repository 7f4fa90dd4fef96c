//! Session State: the working set of documents, the published results and the
//! user-facing status of one interactive session.

use crate::document::{Document, ModelId, RunState};
use crate::error::{DistillError, Result};
use crate::intake::{self, DroppedFile};
use crate::processor::{BatchProcessor, RunReport};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shown for a document that has no processed content yet.
pub const NOT_PROCESSED: &str = "Not processed yet";

/// Side-by-side view of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub name: String,
    pub original: String,
    pub processed: String,
}

pub struct Session {
    processor: Arc<BatchProcessor>,
    documents: Vec<Document>,
    results: Vec<Document>,
    model: Option<ModelId>,
    instruction: String,
    banner: Option<String>,
}

impl Session {
    pub fn new(processor: Arc<BatchProcessor>) -> Self {
        Self {
            processor,
            documents: Vec::new(),
            results: Vec::new(),
            model: None,
            instruction: String::new(),
            banner: None,
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Documents published by the last completed run
    pub fn results(&self) -> &[Document] {
        &self.results
    }

    pub fn set_model(&mut self, model: ModelId) {
        self.model = Some(model);
    }

    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.instruction = instruction.into();
    }

    pub fn run_state(&self) -> RunState {
        self.processor.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.processor.subscribe()
    }

    /// Current banner: an intake/run error, else the processor's last diagnostic
    pub fn error(&self) -> Option<String> {
        self.banner
            .clone()
            .or_else(|| self.processor.state().last_error)
    }

    pub fn dismiss_error(&mut self) {
        self.banner = None;
        self.processor.dismiss_error();
    }

    /// Append a multi-file drop to the working set. Returns how many documents were added.
    pub fn add_dropped(&mut self, files: Vec<DroppedFile>) -> usize {
        match intake::read_dropped(files) {
            Ok(docs) => self.append(docs),
            Err(e) => {
                log::error!("Drop failed: {}", e);
                self.banner = Some(e.to_string());
                0
            }
        }
    }

    /// Append the files directly inside `dir`. On failure nothing from `dir`
    /// is added and the banner carries the reason.
    pub fn add_directory(&mut self, dir: &Path) -> usize {
        match intake::read_directory(dir) {
            Ok(docs) => self.append(docs),
            Err(e) => {
                log::error!("Folder selection error: {}", e);
                self.banner = Some(e.to_string());
                0
            }
        }
    }

    /// Names are unique within the working set: a document whose name is
    /// already present replaces the earlier one in place.
    fn append(&mut self, docs: Vec<Document>) -> usize {
        let added = docs.len();
        for doc in docs {
            match self.documents.iter_mut().find(|d| d.name == doc.name) {
                Some(existing) => {
                    log::warn!("Replacing already collected file {}", doc.name);
                    *existing = doc;
                }
                None => self.documents.push(doc),
            }
        }
        added
    }

    /// Whether a run may start now
    pub fn can_process(&self) -> bool {
        self.model.as_ref().is_some_and(|m| !m.is_blank())
            && !self.instruction.trim().is_empty()
            && !self.processor.is_processing()
            && !self.documents.is_empty()
    }

    /// Run the working set through the processor and publish the results.
    ///
    /// Refusals (missing model, instruction or files, or a run already
    /// active) start nothing and are surfaced on the banner.
    pub async fn process(&mut self, cancel: &CancellationToken) -> Result<RunReport> {
        self.banner = None;

        let model = match &self.model {
            Some(model) => model.clone(),
            None => {
                let err = DistillError::Precondition("no model selected".to_string());
                self.banner = Some(format!("Failed to process files: {}", err));
                return Err(err);
            }
        };

        match self
            .processor
            .run(&mut self.documents, &self.instruction, &model, cancel)
            .await
        {
            Ok(report) => {
                self.results = self.documents.clone();
                Ok(report)
            }
            Err(e) => {
                log::error!("Processing error: {}", e);
                self.banner = Some(format!("Failed to process files: {}", e));
                Err(e)
            }
        }
    }

    /// Drop the working set, the results, progress and the banner
    pub fn clear(&mut self) {
        self.documents.clear();
        self.results.clear();
        self.banner = None;
        self.processor.reset_state();
    }

    /// Original and processed text of `name`, preferring the published results
    pub fn preview(&self, name: &str) -> Option<Preview> {
        self.results
            .iter()
            .chain(self.documents.iter())
            .find(|d| d.name == name)
            .map(|d| Preview {
                name: d.name.clone(),
                original: d.content.clone(),
                processed: d
                    .processed_content
                    .clone()
                    .unwrap_or_else(|| NOT_PROCESSED.to_string()),
            })
    }
}
