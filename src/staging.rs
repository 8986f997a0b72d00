use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{PartName, PartRecord};
use crate::error::SyncError;

/// Where a staged record sits in the pipeline. Recorded inside the blob
/// so the directory layout is not the only carrier of stage identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Post-normalization and sequence annotation, pre-homology.
    Normalized,
    /// Post-homology enrichment, pre-upload.
    Enriched,
    /// Uploaded; retained for the contains-linkage pass.
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub status: StageStatus,
    pub record: PartRecord,
}

pub fn blob_path(dir: &Utf8Path, name: &PartName) -> Utf8PathBuf {
    dir.join(format!("{}.json", name.file_stem()))
}

/// Serializes the record into `dir`, keyed by part name, atomically
/// (write to a temp name, then rename). An interrupted run never leaves
/// a half-written blob behind.
pub fn stage(record: &PartRecord, status: StageStatus, dir: &Utf8Path) -> Result<(), SyncError> {
    fs::create_dir_all(dir.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let path = blob_path(dir, &record.part_name);
    let staged = StagedRecord {
        status,
        record: record.clone(),
    };
    let content = serde_json::to_vec_pretty(&staged)
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(tmp_path.as_std_path(), &content)
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))
}

/// Loads every staged blob in `dir`, sorted by file name. Foreign or
/// unreadable files are skipped with a warning; the directory may be
/// touched by external tooling between runs, and file presence is the
/// only coordination primitive here.
pub fn load_all(dir: &Utf8Path) -> Result<Vec<StagedRecord>, SyncError> {
    if !dir.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.extension().map(|ext| ext == "json").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable staged blob");
                continue;
            }
        };
        match serde_json::from_str::<StagedRecord>(&content) {
            Ok(staged) => records.push(staged),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unparseable staged blob");
            }
        }
    }
    Ok(records)
}

pub fn remove(name: &PartName, dir: &Utf8Path) -> Result<(), SyncError> {
    let path = blob_path(dir, name);
    fs::remove_file(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("remove staged blob {path}: {err}")))
}

/// Removes every staged blob in `dir`, leaving foreign files alone.
pub fn clear(dir: &Utf8Path) -> Result<(), SyncError> {
    if !dir.as_std_path().exists() {
        return Ok(());
    }
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.extension().map(|ext| ext == "json").unwrap_or(false) {
            fs::remove_file(&path).map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

/// Moves a blob between staging directories, atomically when both sit
/// on the same filesystem.
pub fn promote(name: &PartName, from: &Utf8Path, to: &Utf8Path) -> Result<(), SyncError> {
    fs::create_dir_all(to.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let source = blob_path(from, name);
    let dest = blob_path(to, name);
    fs::rename(source.as_std_path(), dest.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("promote {source}: {err}")))
}
