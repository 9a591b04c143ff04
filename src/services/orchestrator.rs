use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::services::engine::ConversionEngine;
use crate::services::result_store::{
    RetentionPolicy, ResultStore, StoreError, StoredArtifact, remove_if_exists, remove_stale_entries,
};
use crate::services::validator::ValidatedUpload;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("{0}")]
    EngineFailure(String),

    #[error("Failed to stage upload: {0}")]
    Staging(#[source] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One conversion attempt. Owns its staging directory, which is deleted
/// together with everything left in it when the job is dropped.
#[derive(Debug)]
pub struct ConversionJob {
    pub id: Uuid,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub status: JobStatus,
    dir: TempDir,
}

impl ConversionJob {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Removes the job from the active set however the conversion ends.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.key);
    }
}

pub struct ConversionOrchestrator {
    staging_dir: PathBuf,
    engine: Arc<dyn ConversionEngine>,
    store: ResultStore,
    /// Names of job directories currently in use, spared by the stale sweep.
    active: Mutex<HashSet<String>>,
}

impl ConversionOrchestrator {
    pub fn new(staging_dir: impl Into<PathBuf>, engine: Arc<dyn ConversionEngine>, store: ResultStore) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            engine,
            store,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn engine(&self) -> &Arc<dyn ConversionEngine> {
        &self.engine
    }

    /// Stages the upload, runs the engine and registers the result.
    ///
    /// The staged source is removed before this returns, on every path. An
    /// artifact only becomes resolvable once it is completely in the store.
    pub async fn convert(&self, upload: ValidatedUpload) -> Result<StoredArtifact, ConversionError> {
        let download_name = format!("{}.pdf", upload.stem());
        let original_name = upload.file_name().to_string();

        let mut job = self.stage(upload).await?;
        let _active = self.mark_active(&job);
        let started = Instant::now();

        tracing::info!(
            job_id = %job.id,
            file = %original_name,
            engine = self.engine.name(),
            "Starting conversion"
        );

        let outcome = self.run_engine(&job).await;

        if let Err(e) = remove_if_exists(&job.source_path).await {
            tracing::warn!(job_id = %job.id, "Failed to remove staged source: {e}");
        }

        match outcome {
            Ok(()) => match self.store.register(&job.target_path, &download_name).await {
                Ok(artifact) => {
                    job.status = JobStatus::Succeeded;
                    tracing::info!(
                        job_id = %job.id,
                        artifact_id = %artifact.id,
                        status = ?job.status,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Conversion finished"
                    );
                    Ok(artifact)
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    tracing::error!(job_id = %job.id, status = ?job.status, "Failed to register artifact: {e}");
                    Err(e.into())
                }
            },
            Err(message) => {
                job.status = JobStatus::Failed;
                let _ = remove_if_exists(&job.target_path).await;
                tracing::warn!(
                    job_id = %job.id,
                    status = ?job.status,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Conversion failed: {message}"
                );
                Err(ConversionError::EngineFailure(message))
            }
        }
    }

    /// Removes job directories older than the policy that no running job owns,
    /// e.g. left behind by a crash.
    pub async fn sweep_staging(&self, policy: &RetentionPolicy) -> io::Result<usize> {
        let active: HashSet<String> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        remove_stale_entries(&self.staging_dir, policy, |path| {
            path.file_name()
                .map(|name| active.contains(name.to_string_lossy().as_ref()))
                .unwrap_or(false)
        })
        .await
    }

    async fn stage(&self, upload: ValidatedUpload) -> Result<ConversionJob, ConversionError> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(ConversionError::Staging)?;

        let id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", id.simple()))
            .tempdir_in(&self.staging_dir)
            .map_err(ConversionError::Staging)?;

        let source_path = dir.path().join(format!("{}.{}", id.simple(), upload.extension()));
        let target_path = source_path.with_extension("pdf");

        tokio::fs::write(&source_path, upload.into_bytes())
            .await
            .map_err(ConversionError::Staging)?;

        Ok(ConversionJob {
            id,
            source_path,
            target_path,
            status: JobStatus::Pending,
            dir,
        })
    }

    fn mark_active(&self, job: &ConversionJob) -> ActiveGuard<'_> {
        let key = job
            .dir()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone());
        ActiveGuard {
            active: &self.active,
            key,
        }
    }

    async fn run_engine(&self, job: &ConversionJob) -> Result<(), String> {
        self.engine
            .convert(&job.source_path, &job.target_path)
            .await
            .map_err(|e| e.to_string())?;

        verify_pdf(&job.target_path).await
    }
}

/// The engine claiming success is not enough, the target must look like a PDF.
async fn verify_pdf(path: &Path) -> Result<(), String> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err("Conversion completed but output file not found".to_string());
        }
        Err(e) => return Err(format!("Cannot read converted file: {e}")),
    };

    let mut magic = [0u8; 5];
    match file.read_exact(&mut magic).await {
        Ok(_) if magic == PDF_MAGIC => Ok(()),
        _ => Err("Conversion produced a file that is not a PDF".to_string()),
    }
}
