//! Reconciliation with peer nodes.

mod active;
mod orchestrator;
mod peer_client;

pub use active::{ActiveSyncs, SyncRegistration};
pub use orchestrator::{
    compute_needed, extract_archive, SyncError, SyncOrchestrator, SyncOutcome, SyncSettings,
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
pub use peer_client::{
    CreatedJob, HttpPeerClient, HttpPeerConnector, PeerClient, PeerConnector, PeerError,
};

/// Remote names double as directory names under `imports/`, so they must be
/// a single plain path component.
pub fn is_valid_remote_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name.trim() == name
}
