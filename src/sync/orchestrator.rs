//! Pull-based reconciliation against a peer node.
//!
//! A sync fetches the peer's manifest, works out which tracks are missing
//! locally and pulls them in fixed-size batches, each one packaged by the
//! peer as a zip archive and extracted under `imports/<remote>/`. The
//! ingest pipeline picks the extracted files up from there.

use super::active::{ActiveSyncs, SyncRegistration};
use super::peer_client::{PeerClient, PeerConnector, PeerError};
use super::is_valid_remote_name;
use crate::archive_jobs::ArchiveJobStatus;
use crate::library::{durations_match, normalize_tag, ManifestTrack, RemoteStore, TrackIndex};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

pub const DEFAULT_BATCH_SIZE: usize = 30;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("A sync for remote {0} is already running")]
    AlreadyRunning(String),

    #[error("Invalid remote name {0:?}")]
    InvalidRemoteName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was missing locally.
    UpToDate,
    Completed { batches: usize, failed_batches: usize },
    Cancelled,
    Failed(String),
}

#[derive(Debug, Error)]
enum BatchError {
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("remote job {0} failed")]
    RemoteJobFailed(String),

    #[error("remote job {job_id} still processing after {attempts} polls")]
    Timeout { job_id: String, attempts: u32 },

    #[error("extraction failed: {0}")]
    Extract(String),
}

pub struct SyncOrchestrator {
    index: Arc<dyn TrackIndex>,
    remotes: Arc<dyn RemoteStore>,
    connector: Arc<dyn PeerConnector>,
    active: ActiveSyncs,
    imports_dir: PathBuf,
    staging_dir: PathBuf,
    settings: SyncSettings,
    tasks: TaskTracker,
}

impl SyncOrchestrator {
    pub fn new(
        index: Arc<dyn TrackIndex>,
        remotes: Arc<dyn RemoteStore>,
        connector: Arc<dyn PeerConnector>,
        imports_dir: PathBuf,
        staging_dir: PathBuf,
        settings: SyncSettings,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            index,
            remotes,
            connector,
            active: ActiveSyncs::new(),
            imports_dir,
            staging_dir,
            settings,
            tasks,
        }
    }

    pub fn active(&self) -> &ActiveSyncs {
        &self.active
    }

    pub fn is_syncing(&self, name: &str) -> bool {
        self.active.is_active(name)
    }

    /// Stops the sync of `name` at its next checkpoint.
    pub fn cancel(&self, name: &str) -> bool {
        let cancelled = self.active.cancel(name);
        if cancelled {
            info!("Sync {}: cancellation requested", name);
        }
        cancelled
    }

    pub fn cancel_all(&self) {
        self.active.cancel_all();
    }

    fn register(&self, name: &str) -> Result<SyncRegistration, SyncError> {
        if !is_valid_remote_name(name) {
            return Err(SyncError::InvalidRemoteName(name.to_string()));
        }
        self.active
            .try_begin(name)
            .ok_or_else(|| SyncError::AlreadyRunning(name.to_string()))
    }

    /// Admits the sync synchronously and runs it on a tracked task.
    pub fn start(self: &Arc<Self>, name: &str, url: &str) -> Result<(), SyncError> {
        let registration = self.register(name)?;
        let this = self.clone();
        let url = url.to_string();
        self.tasks.spawn(async move {
            let name = registration.name().to_string();
            let outcome = this.run(registration, &url).await;
            log_outcome(&name, &outcome);
        });
        Ok(())
    }

    /// Runs a sync to completion on the current task.
    pub async fn sync_now(&self, name: &str, url: &str) -> Result<SyncOutcome, SyncError> {
        let registration = self.register(name)?;
        let outcome = self.run(registration, url).await;
        log_outcome(name, &outcome);
        Ok(outcome)
    }

    async fn run(&self, registration: SyncRegistration, url: &str) -> SyncOutcome {
        let name = registration.name().to_string();
        info!("Sync {}: connecting to {}", name, url);

        let peer = match self.connector.connect(url) {
            Ok(peer) => peer,
            Err(err) => return SyncOutcome::Failed(err.to_string()),
        };
        let manifest = match peer.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(err) => return SyncOutcome::Failed(err.to_string()),
        };
        if registration.is_cancelled() {
            return SyncOutcome::Cancelled;
        }

        let needed = match compute_needed(&manifest.tracks, self.index.as_ref()) {
            Ok(needed) => needed,
            Err(err) => return SyncOutcome::Failed(format!("{:#}", err)),
        };
        info!(
            "Sync {}: peer lists {} tracks, {} needed",
            name,
            manifest.tracks.len(),
            needed.len()
        );
        if needed.is_empty() {
            self.record_sync(&name);
            return SyncOutcome::UpToDate;
        }

        let destination = self.imports_dir.join(&name);
        let batch_size = self.settings.batch_size.max(1);
        let batches: Vec<&[String]> = needed.chunks(batch_size).collect();
        let mut failed_batches = 0;

        for (index, batch) in batches.iter().enumerate() {
            if registration.is_cancelled() {
                return SyncOutcome::Cancelled;
            }
            let batch_number = index + 1;
            debug!(
                "Sync {}: batch {}/{} with {} files",
                name,
                batch_number,
                batches.len(),
                batch.len()
            );

            match self
                .run_batch(peer.as_ref(), batch, &destination, registration.token())
                .await
            {
                Ok(extracted) => {
                    info!(
                        "Sync {}: batch {}/{} extracted {} files",
                        name,
                        batch_number,
                        batches.len(),
                        extracted
                    );
                }
                Err(BatchError::Cancelled) => return SyncOutcome::Cancelled,
                Err(err) => {
                    warn!(
                        "Sync {}: batch {}/{} failed: {}",
                        name,
                        batch_number,
                        batches.len(),
                        err
                    );
                    failed_batches += 1;
                }
            }
        }

        if registration.is_cancelled() {
            return SyncOutcome::Cancelled;
        }
        self.record_sync(&name);
        SyncOutcome::Completed {
            batches: batches.len(),
            failed_batches,
        }
    }

    async fn run_batch(
        &self,
        peer: &dyn PeerClient,
        files: &[String],
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<usize, BatchError> {
        let job = peer.create_job(files).await?;
        let mut status = job.status;
        let mut attempts = 0;

        while status == ArchiveJobStatus::Processing {
            if attempts >= self.settings.max_poll_attempts {
                return Err(BatchError::Timeout {
                    job_id: job.job_id,
                    attempts,
                });
            }
            attempts += 1;
            tokio::select! {
                _ = cancel.cancelled() => return Err(BatchError::Cancelled),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
            status = peer.job_status(&job.job_id).await?;
        }
        if status == ArchiveJobStatus::Error {
            return Err(BatchError::RemoteJobFailed(job.job_id));
        }

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(PeerError::from)?;
        // Removed from disk when dropped, whatever happens below.
        let staged = tempfile::Builder::new()
            .prefix("sync_")
            .suffix(".zip")
            .tempfile_in(&self.staging_dir)
            .map_err(PeerError::from)?
            .into_temp_path();

        let bytes = peer.download_archive(&job.job_id, &staged).await?;
        debug!("Downloaded archive for job {} ({} bytes)", job.job_id, bytes);

        let archive = staged.to_path_buf();
        let destination = destination.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extract_archive(&archive, &destination))
            .await
            .map_err(|e| BatchError::Extract(e.to_string()))?
            .map_err(|e| BatchError::Extract(e.to_string()))?;

        drop(staged);
        Ok(extracted)
    }

    fn record_sync(&self, name: &str) {
        let now = chrono::Utc::now().timestamp_millis();
        match self.remotes.update_last_sync(name, now) {
            Ok(true) => {}
            Ok(false) => debug!("Sync {}: remote no longer stored, last_sync not recorded", name),
            Err(err) => error!("Sync {}: failed to record last_sync: {:#}", name, err),
        }
    }
}

fn log_outcome(name: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::UpToDate => info!("Sync {}: already up to date", name),
        SyncOutcome::Completed {
            batches,
            failed_batches,
        } => info!(
            "Sync {}: completed {} batches ({} failed)",
            name, batches, failed_batches
        ),
        SyncOutcome::Cancelled => info!("Sync {}: cancelled", name),
        SyncOutcome::Failed(reason) => error!("Sync {}: failed: {}", name, reason),
    }
}

/// Paths of the peer's tracks that are not already covered locally, either
/// by identical content or by a same-song copy of at least equal bitrate.
pub fn compute_needed(
    remote_tracks: &[ManifestTrack],
    index: &dyn TrackIndex,
) -> anyhow::Result<Vec<String>> {
    let mut needed = Vec::new();
    let mut seen = HashSet::new();

    for track in remote_tracks {
        if index.get_by_hash(&track.hash)?.is_some() {
            continue;
        }
        if covered_by_metadata(track, index)? {
            continue;
        }
        if seen.insert(track.path.clone()) {
            needed.push(track.path.clone());
        }
    }

    Ok(needed)
}

fn covered_by_metadata(track: &ManifestTrack, index: &dyn TrackIndex) -> anyhow::Result<bool> {
    let Some(duration) = track.duration.filter(|d| *d > 0.0) else {
        return Ok(false);
    };
    let title = normalize_tag(&track.title);
    if title.is_empty() {
        return Ok(false);
    }

    let candidates = index.find_by_metadata(&title, &normalize_tag(&track.artist))?;
    Ok(candidates.iter().any(|local| {
        local.duration > 0.0
            && durations_match(local.duration, duration)
            && local.bitrate >= track.bitrate
    }))
}

/// Extracts every entry whose name stays inside `destination`. Returns the
/// number of files written.
pub fn extract_archive(archive: &Path, destination: &Path) -> io::Result<usize> {
    fs::create_dir_all(destination)?;
    let mut zip = ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(io::Error::other)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping archive entry with unsafe name {:?}", entry.name());
            continue;
        };
        let target = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    Ok(extracted)
}
