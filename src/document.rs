//! Data model shared by intake, the batch processor and the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix appended to the stem of every persisted document.
pub const PROCESSED_SUFFIX: &str = "_processed.txt";

/// A named unit of text plus its (eventually populated) processed counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Relative filename, unique within a batch
    pub name: String,
    /// Raw text as read at intake
    pub content: String,
    /// Completion result or an inline error marker, set once by the processor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_content: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            processed_content: None,
            status: ItemStatus::Pending,
        }
    }

    /// Filename used when persisting the processed text: the final extension
    /// is stripped and `_processed.txt` appended.
    ///
    /// `report.v2.txt` becomes `report.v2_processed.txt`.
    pub fn output_filename(&self) -> String {
        derive_output_filename(&self.name)
    }
}

/// Strip the final extension of `name` and append [`PROCESSED_SUFFIX`].
///
/// A leading dot (`.env`) is part of the stem, not an extension.
pub fn derive_output_filename(name: &str) -> String {
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => &name[..idx],
        _ => name,
    };
    format!("{}{}", stem, PROCESSED_SUFFIX)
}

/// Outcome of one document within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not yet attempted
    #[default]
    Pending,
    /// Completed and persisted
    Saved,
    /// Completed, but the persistence write failed
    Unsaved,
    /// The completion call failed; `processed_content` carries the error marker
    Failed,
    /// Not attempted because the run was cancelled
    Skipped,
}

/// Identifier of the backend/model a batch targets. Free-form, only required
/// to be non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Persistence namespace of a run, derived from its start time.
///
/// Rendered as ISO-8601 UTC with millisecond precision and every `:` and `.`
/// removed, so it sorts chronologically and is safe as a path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let iso = at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        Self(iso.replace([':', '.'], ""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transient status of the active (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunState {
    pub is_processing: bool,
    /// 0.0..=100.0, items attempted over items total
    pub progress_percent: f64,
    /// Run-level diagnostic shown as a dismissible banner
    pub last_error: Option<String>,
}
