use crate::error::{DistillError, Result};
use crate::persistence::{check_batch_id, check_segment, PersistenceGateway};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Writes processed documents to `<root>/<prefix><batch_id>/<filename>`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    dir_prefix: String,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(root: P, dir_prefix: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            dir_prefix: dir_prefix.into(),
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(config.output_root(), config.storage.dir_prefix.clone())
    }

    /// Directory holding every file of one batch
    pub fn batch_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", self.dir_prefix, batch_id))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl PersistenceGateway for FsStore {
    async fn store(&self, batch_id: &str, filename: &str, content: &str) -> Result<PathBuf> {
        check_batch_id(batch_id)?;
        check_segment("filename", filename)?;

        let dir = self.batch_dir(batch_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DistillError::Storage(format!("create {}: {}", dir.display(), e)))?;

        // Write beside the target, then rename over it
        let path = dir.join(filename);
        let tmp = dir.join(format!(".{}.tmp", filename));

        if let Err(e) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(DistillError::Storage(format!("write {}: {}", tmp.display(), e)));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(DistillError::Storage(format!("rename to {}: {}", path.display(), e)));
        }

        log::debug!("Stored {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }
}
