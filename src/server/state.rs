use axum::extract::FromRef;

use crate::archive_jobs::JobManager;
use crate::library::{RemoteStore, TrackIndex};
use crate::media::PathGuard;
use crate::sync::SyncOrchestrator;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedTrackIndex = Arc<dyn TrackIndex>;
pub type GuardedRemoteStore = Arc<dyn RemoteStore>;
pub type GuardedPathGuard = Arc<PathGuard>;
pub type GuardedJobManager = Arc<JobManager>;
pub type GuardedSyncOrchestrator = Arc<SyncOrchestrator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub track_index: GuardedTrackIndex,
    pub remote_store: GuardedRemoteStore,
    pub path_guard: GuardedPathGuard,
    pub job_manager: GuardedJobManager,
    pub sync_orchestrator: GuardedSyncOrchestrator,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        track_index: GuardedTrackIndex,
        remote_store: GuardedRemoteStore,
        path_guard: GuardedPathGuard,
        job_manager: GuardedJobManager,
        sync_orchestrator: GuardedSyncOrchestrator,
    ) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            track_index,
            remote_store,
            path_guard,
            job_manager,
            sync_orchestrator,
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedTrackIndex {
    fn from_ref(input: &ServerState) -> Self {
        input.track_index.clone()
    }
}

impl FromRef<ServerState> for GuardedRemoteStore {
    fn from_ref(input: &ServerState) -> Self {
        input.remote_store.clone()
    }
}

impl FromRef<ServerState> for GuardedPathGuard {
    fn from_ref(input: &ServerState) -> Self {
        input.path_guard.clone()
    }
}

impl FromRef<ServerState> for GuardedJobManager {
    fn from_ref(input: &ServerState) -> Self {
        input.job_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedSyncOrchestrator {
    fn from_ref(input: &ServerState) -> Self {
        input.sync_orchestrator.clone()
    }
}
