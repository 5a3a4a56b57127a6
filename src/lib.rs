//! mrepo: a self-hosted media library node.
//!
//! This library exposes the internal modules for the binary and for testing.

pub mod archive_jobs;
pub mod config;
pub mod ingestion;
pub mod library;
pub mod media;
pub mod node;
pub mod server;
pub mod sqlite_persistence;
pub mod sync;
pub mod throttle;

// Re-export commonly used types for convenience
pub use library::{RemoteStore, SqliteLibraryStore, TrackIndex};
pub use node::Node;
pub use server::{make_app, run_server, RequestsLoggingLevel};
