//! Wires the library, ingestion, job and sync components into a running node.

use crate::archive_jobs::JobManager;
use crate::config::{AppConfig, SYSTEM_DIR_NAME};
use crate::ingestion::{IngestHandle, IngestPipeline, Ingestor, PollingWatcher};
use crate::library::{RemoteStore, SqliteLibraryStore, TrackIndex};
use crate::media::{MetadataExtractor, PathGuard, SignatureVerifier};
use crate::server::{ServerConfig, ServerState};
use crate::sync::{is_valid_remote_name, HttpPeerConnector, PeerConnector, SyncOrchestrator};
use crate::throttle::bytes_per_second_from_mbps;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub struct Node {
    state: ServerState,
    ingest: IngestHandle,
    ingest_worker: JoinHandle<()>,
    watcher: JoinHandle<()>,
    watcher_stop: CancellationToken,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Node {
    pub fn start(config: &AppConfig, extractor: Arc<dyn MetadataExtractor>) -> Result<Self> {
        Self::start_with_connector(
            config,
            extractor,
            Arc::new(HttpPeerConnector::new(config.request_timeout)),
        )
    }

    /// Like [`Node::start`], with a custom way of reaching peers.
    pub fn start_with_connector(
        config: &AppConfig,
        extractor: Arc<dyn MetadataExtractor>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self> {
        for dir in [config.system_dir(), config.staging_dir(), config.imports_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }

        info!("Opening library database at {:?}...", config.db_path());
        let store = Arc::new(SqliteLibraryStore::new(config.db_path())?);
        seed_remotes(store.as_ref(), config)?;

        let guard = Arc::new(
            PathGuard::new(&config.root, SYSTEM_DIR_NAME)
                .with_context(|| format!("Failed to resolve managed root {:?}", config.root))?,
        );
        let verifier = Arc::new(SignatureVerifier::new(
            &config.security.extensions,
            &config.security.signatures,
        ));

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();

        let ingestor = Ingestor::new(guard.clone(), store.clone(), verifier, extractor);
        let (ingest, ingest_worker) =
            IngestPipeline::spawn(ingestor, config.ingest.queue_capacity, shutdown.clone());

        let mut watcher = PollingWatcher::new(
            guard.root().to_path_buf(),
            guard.system_dir().to_path_buf(),
            config.ingest.watch_interval,
        );
        let known = store.list_paths()?;
        info!("Library index holds {} paths", known.len());
        watcher.seed_known(known.iter().map(|rel| guard.absolute(rel)));
        let watcher_stop = shutdown.child_token();
        let watcher = tokio::spawn(watcher.run(ingest.clone(), watcher_stop.clone()));

        let job_manager = Arc::new(JobManager::new(
            guard.clone(),
            config.staging_dir(),
            config.job_expiry,
            tasks.clone(),
            shutdown.clone(),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            store.clone(),
            connector,
            config.imports_dir(),
            config.staging_dir(),
            config.sync.clone(),
            tasks.clone(),
        ));

        let server_config = ServerConfig {
            requests_logging_level: config.logging_level.clone(),
            port: config.port,
            admin_key: config.admin_key.clone(),
            download_bytes_per_second: bytes_per_second_from_mbps(
                config.security.download_throttle_mbps,
            ),
        };
        let state = ServerState::new(
            server_config,
            store.clone(),
            store,
            guard,
            job_manager,
            orchestrator,
        );

        Ok(Self {
            state,
            ingest,
            ingest_worker,
            watcher,
            watcher_stop,
            shutdown,
            tasks,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state.clone()
    }

    pub fn ingest(&self) -> &IngestHandle {
        &self.ingest
    }

    /// Stops the watcher, cancels syncs, drains the ingest queue, then waits
    /// for packaging and sync tasks to finish.
    pub async fn shutdown(self) {
        info!("Shutting down node...");
        self.watcher_stop.cancel();
        if let Err(err) = self.watcher.await {
            warn!("Watcher task failed: {}", err);
        }

        self.state.sync_orchestrator.cancel_all();

        if let Err(err) = self.ingest.flush().await {
            warn!("Could not flush ingest queue: {}", err);
        }
        self.shutdown.cancel();

        self.tasks.close();
        self.tasks.wait().await;
        if let Err(err) = self.ingest_worker.await {
            warn!("Ingest worker failed: {}", err);
        }
        info!("Node stopped");
    }
}

/// Inserts configured remotes the store does not know yet. Existing records
/// keep their url and `last_sync`.
fn seed_remotes(store: &dyn RemoteStore, config: &AppConfig) -> Result<()> {
    for remote in &config.remotes {
        if !is_valid_remote_name(&remote.name) {
            warn!("Ignoring configured remote with invalid name {:?}", remote.name);
            continue;
        }
        if store.seed_remote(&remote.name, &remote.url)? {
            info!("Added remote {} from config", remote.name);
        }
    }
    Ok(())
}
