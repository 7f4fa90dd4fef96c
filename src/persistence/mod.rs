//! Persistence Gateway: durable storage of processed documents under a
//! per-batch namespace.

pub mod fs;
pub mod http;

use crate::error::{DistillError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

pub use fs::FsStore;
pub use http::{HttpGateway, SaveRequest, SaveResponse};

/// Stores `content` as `filename` inside the namespace of `batch_id`.
///
/// The namespace is created on first use and an existing file of the same
/// name in the same batch is overwritten. A failed store leaves no truncated
/// file behind. Errors are reported as
/// [`DistillError::Storage`](crate::DistillError::Storage).
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn store(&self, batch_id: &str, filename: &str, content: &str) -> Result<PathBuf>;
}

/// Reject values that would escape the storage root when used as a path segment.
pub(crate) fn check_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0'])
    {
        return Err(DistillError::Storage(format!("invalid {}: {:?}", kind, value)));
    }
    Ok(())
}

/// Batch ids must already be sanitized: no `:` or `.` characters.
pub(crate) fn check_batch_id(batch_id: &str) -> Result<()> {
    check_segment("batch id", batch_id)?;
    if batch_id.contains([':', '.']) {
        return Err(DistillError::Storage(format!(
            "batch id must not contain ':' or '.': {:?}",
            batch_id
        )));
    }
    Ok(())
}
