//! Filesystem events in, deduplicated track index out.

mod events;
mod ingestor;
mod pipeline;
mod watcher;

pub use events::FsEvent;
pub use ingestor::{IngestError, Ingestor, ScanOutcome};
pub use pipeline::{IngestHandle, IngestPipeline, DEFAULT_QUEUE_CAPACITY};
pub use watcher::{scan_tree, FileStamp, PollingWatcher};
