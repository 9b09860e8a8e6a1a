//! Stage-addressed artifact storage.
//!
//! Layout: `<root>/<run_id>/<stage file>` plus per-stage sidecar directories
//! (`media/`, `images/`). Writes go to a temporary file in the same directory
//! and are renamed into place, so a present artifact is always complete.

use crate::error::Result;
use crate::stage::{Artifact, Stage};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-run artifact directories under one root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Where the artifact of `stage` for `run_id` lives (whether or not it exists).
    pub fn path_for(&self, run_id: &str, stage: Stage) -> PathBuf {
        self.run_dir(run_id).join(stage.file_name())
    }

    pub fn exists(&self, run_id: &str, stage: Stage) -> bool {
        self.path_for(run_id, stage).is_file()
    }

    /// The stored artifact of `stage`, if present.
    pub fn artifact(&self, run_id: &str, stage: Stage) -> Option<Artifact> {
        let path = self.path_for(run_id, stage);
        path.is_file().then(|| Artifact::produced(stage, path))
    }

    /// Stages whose artifact is present, in pipeline order.
    pub fn present_stages(&self, run_id: &str) -> Vec<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .filter(|s| self.exists(run_id, *s))
            .collect()
    }

    /// Sidecar directory of `stage`, created on demand.
    pub async fn sidecar_dir(&self, run_id: &str, stage: Stage) -> Result<Option<PathBuf>> {
        match stage.sidecar_dir() {
            Some(name) => {
                let dir = self.run_dir(run_id).join(name);
                tokio::fs::create_dir_all(&dir).await?;
                Ok(Some(dir))
            }
            None => Ok(None),
        }
    }

    /// Atomically write the artifact of `stage`.
    pub async fn write(
        &self,
        run_id: &str,
        stage: Stage,
        content: impl AsRef<[u8]>,
    ) -> Result<Artifact> {
        let target = self.path_for(run_id, stage);
        let tmp = self.temp_path(run_id, stage).await?;

        if let Err(e) = tokio::fs::write(&tmp, content.as_ref()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &target).await?;

        debug!("Wrote {} artifact to {}", stage, target.display());
        Ok(Artifact::produced(stage, target))
    }

    /// Atomically install an externally produced file as the artifact of `stage`.
    pub async fn write_from(&self, run_id: &str, stage: Stage, source: &Path) -> Result<Artifact> {
        let target = self.path_for(run_id, stage);
        let tmp = self.temp_path(run_id, stage).await?;

        if let Err(e) = tokio::fs::copy(source, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &target).await?;

        debug!("Installed {} artifact from {}", stage, source.display());
        Ok(Artifact::produced(stage, target))
    }

    async fn temp_path(&self, run_id: &str, stage: Stage) -> Result<PathBuf> {
        let dir = self.run_dir(run_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.join(format!(".{}.partial", stage.file_name())))
    }

    /// Delete intermediate artifacts and their sidecars. The compiled document is never removed.
    ///
    /// Returns the paths that were removed.
    pub async fn purge(&self, run_id: &str, stages: &[Stage]) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        for stage in stages {
            if *stage == Stage::CompileDocument {
                continue;
            }

            let path = self.path_for(run_id, *stage);
            if path.is_file() {
                tokio::fs::remove_file(&path).await?;
                removed.push(path);
            }

            let partial = self.run_dir(run_id).join(format!(".{}.partial", stage.file_name()));
            if partial.exists() {
                tokio::fs::remove_file(&partial).await?;
            }

            if let Some(name) = stage.sidecar_dir() {
                let dir = self.run_dir(run_id).join(name);
                if dir.is_dir() {
                    tokio::fs::remove_dir_all(&dir).await?;
                    removed.push(dir);
                }
            }
        }

        info!("Purged {} item(s) from run {}", removed.len(), run_id);
        Ok(removed)
    }

    /// Purge every intermediate of a run.
    pub async fn purge_intermediates(&self, run_id: &str) -> Result<Vec<PathBuf>> {
        self.purge(run_id, &Stage::ALL).await
    }

    /// Discard the artifacts of `stages` ahead of re-running them, the compiled document included.
    pub async fn invalidate(&self, run_id: &str, stages: &[Stage]) -> Result<Vec<PathBuf>> {
        let mut removed = self.purge(run_id, stages).await?;

        if stages.contains(&Stage::CompileDocument) {
            let document = self.path_for(run_id, Stage::CompileDocument);
            if document.is_file() {
                warn!("Discarding compiled document {}", document.display());
                tokio::fs::remove_file(&document).await?;
                removed.push(document);
            }
        }

        Ok(removed)
    }
}
