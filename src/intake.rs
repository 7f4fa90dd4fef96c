use crate::document::Document;
use crate::error::{DistillError, Result};
use std::path::Path;
use walkdir::WalkDir;

/// Message surfaced when the folder to read is gone (the picker was dismissed).
pub const FOLDER_CANCELLED: &str = "Folder selection cancelled";

/// A file handed over by a drop, before decoding.
#[derive(Debug, Clone)]
pub struct DroppedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl DroppedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Decode a multi-file drop into documents, preserving drop order.
///
/// Any file that is not valid UTF-8 fails the whole drop; nothing is returned
/// for a failed attempt.
pub fn read_dropped(files: Vec<DroppedFile>) -> Result<Vec<Document>> {
    files
        .into_iter()
        .map(|file| {
            let content = String::from_utf8(file.bytes).map_err(|_| {
                DistillError::Intake(format!("Failed to read file: {} is not valid UTF-8", file.name))
            })?;
            Ok(Document::new(file.name, content))
        })
        .collect()
}

/// Read the files directly inside `dir` (one level, sub-directories skipped).
///
/// Entries are returned sorted by file name. Any failure abandons the whole
/// listing so a partial directory is never merged into the working set.
pub fn read_directory(dir: &Path) -> Result<Vec<Document>> {
    if !dir.exists() {
        return Err(DistillError::Intake(FOLDER_CANCELLED.to_string()));
    }
    if !dir.is_dir() {
        return Err(DistillError::Intake(format!(
            "Failed to read folder: {} is not a directory",
            dir.display()
        )));
    }

    let mut documents = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| DistillError::Intake(format!("Failed to read folder: {}", e)))?;

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let bytes = std::fs::read(entry.path())
            .map_err(|e| DistillError::Intake(format!("Failed to read folder: {}: {}", name, e)))?;
        let content = String::from_utf8(bytes).map_err(|_| {
            DistillError::Intake(format!("Failed to read folder: {} is not valid UTF-8", name))
        })?;

        documents.push(Document::new(name, content));
    }

    log::info!("Read {} files from {}", documents.len(), dir.display());
    Ok(documents)
}
