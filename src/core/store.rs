//! Artifact persistence for pipeline runs.
//!
//! Snapshots are named `{experiment_id}_{step_name}_{sequence}.vol.json`,
//! which is collision-free within a run and across concurrent runs with
//! distinct experiment identifiers, so no locking is needed. Writes go
//! through a temporary file in the target directory and an atomic rename;
//! the temp file is released on every exit path, including failures.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ImageArtifact, RunReport};

/// Extension for volume snapshots
pub const VOLUME_EXT: &str = "vol.json";

/// Persistence failures. These never roll back the in-memory artifact;
/// the orchestrator records them and continues.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not a volume snapshot (expected .{VOLUME_EXT}): {0}")]
    UnsupportedFormat(PathBuf),
}

/// A persisted snapshot, for the run report
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub sha256: String,
}

/// Owns the filesystem namespace of one run.
pub struct ArtifactStore {
    root: PathBuf,
    experiment_id: String,
    sequence: u32,
}

impl ArtifactStore {
    /// Create a store rooted at `root` for the given experiment identifier.
    pub fn create(root: impl Into<PathBuf>, experiment_id: impl Into<String>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            experiment_id: experiment_id.into(),
            sequence: 0,
        })
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Persist a snapshot of the current artifact, tagged with the step
    /// name and a monotonic sequence number.
    pub fn persist_snapshot(
        &mut self,
        step_name: &str,
        image: &ImageArtifact,
        dir_override: Option<&Path>,
    ) -> Result<Snapshot, StoreError> {
        self.sequence += 1;
        let dir = dir_override.unwrap_or(&self.root);
        std::fs::create_dir_all(dir)?;

        let filename = format!(
            "{}_{}_{:03}.{}",
            self.experiment_id, step_name, self.sequence, VOLUME_EXT
        );
        let path = dir.join(filename);
        let sha256 = write_json_atomic(&path, image)?;

        debug!(path = %path.display(), step = step_name, "Persisted snapshot");
        Ok(Snapshot { path, sha256 })
    }

    /// Persist the run report. Called on every exit path, aborts included.
    pub fn persist_report(&self, report: &RunReport) -> Result<PathBuf, StoreError> {
        let path = self
            .root
            .join(format!("{}_report.json", self.experiment_id));
        write_json_atomic(&path, report)?;
        Ok(path)
    }

    /// Read a volume snapshot back from disk.
    pub fn load_volume(path: &Path) -> Result<ImageArtifact, StoreError> {
        if !path
            .to_string_lossy()
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", VOLUME_EXT))
        {
            return Err(StoreError::UnsupportedFormat(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut image: ImageArtifact = serde_json::from_str(&content)?;
        if image.source.is_none() {
            image.source = Some(path.to_path_buf());
        }
        Ok(image)
    }
}

/// Serialize to a temp file in the target directory, then rename into
/// place. Returns the sha256 of the written bytes.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<String, StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let bytes = serde_json::to_vec_pretty(value)?;

    let tmp = NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), &bytes)?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image() -> ImageArtifact {
        ImageArtifact::new("sub", vec![2, 2, 2], [1.0, 1.0, 1.0], "RAS", vec![1.0; 8]).unwrap()
    }

    #[test]
    fn test_snapshot_naming_scheme() {
        let dir = TempDir::new().unwrap();
        let mut store = ArtifactStore::create(dir.path(), "exp-sub01").unwrap();

        let first = store.persist_snapshot("denoising", &image(), None).unwrap();
        let second = store.persist_snapshot("normalization", &image(), None).unwrap();

        assert!(first
            .path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("exp-sub01_denoising_001"));
        assert!(second
            .path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("exp-sub01_normalization_002"));
        assert_ne!(first.path, second.path);
    }

    #[test]
    fn test_snapshot_roundtrip_and_checksum() {
        let dir = TempDir::new().unwrap();
        let mut store = ArtifactStore::create(dir.path(), "exp").unwrap();

        let snapshot = store.persist_snapshot("resampling", &image(), None).unwrap();
        assert_eq!(snapshot.sha256.len(), 64);

        let loaded = ArtifactStore::load_volume(&snapshot.path).unwrap();
        assert_eq!(loaded.dims, vec![2, 2, 2]);
        assert_eq!(loaded.source.as_deref(), Some(snapshot.path.as_path()));
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let err = ArtifactStore::load_volume(Path::new("scan.nii.gz"));
        assert!(matches!(err, Err(StoreError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_report_persisted_for_aborted_run() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::create(dir.path(), "exp-sub02").unwrap();

        let mut report = RunReport::new("exp-sub02", PathBuf::from("missing.vol.json"));
        report.abort("image_loading", "no such file");

        let path = store.persist_report(&report).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("\"aborted\""));
        assert!(content.contains("image_loading"));
    }
}
