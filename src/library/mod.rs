//! Persistent library state: the track index and the known peers.

mod models;
mod schema;
mod sqlite_store;

pub use models::{
    durations_match, normalize_tag, Manifest, ManifestTrack, RemoteRecord, TrackRecord,
    DURATION_MATCH_WINDOW_SECS, UNKNOWN_ARTIST,
};
pub use sqlite_store::SqliteLibraryStore;

use anyhow::Result;

/// Track index keyed by root-relative path, with secondary lookups by
/// content hash and by normalized (title, artist).
///
/// Lookups other than [`TrackIndex::get`] only consider admitted tracks.
pub trait TrackIndex: Send + Sync {
    /// Inserts or replaces the record at `track.path`, marking it admitted.
    fn put(&self, track: &TrackRecord) -> Result<()>;

    /// Returns true if a record was removed.
    fn delete(&self, path: &str) -> Result<bool>;

    fn get(&self, path: &str) -> Result<Option<TrackRecord>>;

    fn get_by_hash(&self, hash: &str) -> Result<Option<TrackRecord>>;

    fn find_by_metadata(&self, title: &str, artist: &str) -> Result<Vec<TrackRecord>>;

    fn list_verified(&self) -> Result<Vec<TrackRecord>>;

    fn list_paths(&self) -> Result<Vec<String>>;

    fn count_verified(&self) -> Result<usize>;
}

pub trait RemoteStore: Send + Sync {
    /// Inserts or replaces a remote, resetting its `last_sync`.
    fn upsert_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Inserts a remote unless one with the same name exists.
    fn seed_remote(&self, name: &str, url: &str) -> Result<bool>;

    fn delete_remote(&self, name: &str) -> Result<bool>;

    fn get_remote(&self, name: &str) -> Result<Option<RemoteRecord>>;

    fn list_remotes(&self) -> Result<Vec<RemoteRecord>>;

    /// Returns false if the remote no longer exists.
    fn update_last_sync(&self, name: &str, timestamp_ms: i64) -> Result<bool>;
}
