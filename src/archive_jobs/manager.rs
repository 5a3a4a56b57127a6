//! Ephemeral zip packaging jobs served to peers.

use super::models::{ArchiveJob, ArchiveJobStatus};
use crate::media::PathGuard;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_JOB_EXPIRY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Packaging task failed: {0}")]
    Task(String),
}

type JobTable = Arc<Mutex<HashMap<String, ArchiveJob>>>;

/// Owns the job table and the archives in the staging directory. Terminal
/// jobs and their archives are dropped `expiry` after they finish.
pub struct JobManager {
    jobs: JobTable,
    guard: Arc<PathGuard>,
    staging_dir: PathBuf,
    expiry: Duration,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl JobManager {
    pub fn new(
        guard: Arc<PathGuard>,
        staging_dir: PathBuf,
        expiry: Duration,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            guard,
            staging_dir,
            expiry,
            tasks,
            shutdown,
        }
    }

    /// Registers a `processing` job and packages `files` in the background.
    /// Paths rejected by the [`PathGuard`] are left out of the archive.
    pub fn create_job(&self, files: Vec<String>) -> ArchiveJob {
        let id = uuid::Uuid::new_v4().to_string();
        let path = self.staging_dir.join(format!("{}.zip", id));
        let job = ArchiveJob {
            id: id.clone(),
            status: ArchiveJobStatus::Processing,
            path: path.clone(),
        };
        self.jobs.lock().unwrap().insert(id.clone(), job.clone());
        info!("Created archive job {} for {} files", id, files.len());

        let jobs = self.jobs.clone();
        let guard = self.guard.clone();
        let expiry = self.expiry;
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            let archive_path = path.clone();
            let result = tokio::task::spawn_blocking(move || build_archive(&guard, &files, &archive_path))
                .await
                .unwrap_or_else(|e| Err(PackagingError::Task(e.to_string())));

            let status = match result {
                Ok(entries) => {
                    info!("Archive job {} ready with {} entries", id, entries);
                    ArchiveJobStatus::Ready
                }
                Err(err) => {
                    warn!("Archive job {} failed: {}", id, err);
                    remove_archive(&path).await;
                    ArchiveJobStatus::Error
                }
            };
            if let Some(job) = jobs.lock().unwrap().get_mut(&id) {
                job.status = status;
            }

            tokio::select! {
                _ = tokio::time::sleep(expiry) => {}
                _ = shutdown.cancelled() => {}
            }
            jobs.lock().unwrap().remove(&id);
            remove_archive(&path).await;
            debug!("Archive job {} expired", id);
        });

        job
    }

    pub fn get_job(&self, id: &str) -> Option<ArchiveJob> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

async fn remove_archive(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove archive {:?}: {}", path, err);
        }
    }
}

/// Writes the archive and returns the number of entries. Entries are named
/// by their root-relative path and stored uncompressed.
fn build_archive(guard: &PathGuard, files: &[String], dest: &Path) -> Result<usize, PackagingError> {
    let mut zip = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut written = HashSet::new();
    for requested in files {
        let Some(source) = guard.resolve(requested) else {
            debug!("Skipping unsafe or missing path {:?}", requested);
            continue;
        };
        if !source.is_file() {
            continue;
        }
        let Some(name) = guard.relative(&source) else {
            continue;
        };
        if !written.insert(name.clone()) {
            continue;
        }

        zip.start_file(name, options)?;
        let mut reader = File::open(&source)?;
        io::copy(&mut reader, &mut zip)?;
    }

    zip.finish()?;
    Ok(written.len())
}
