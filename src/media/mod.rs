//! Per-file checks used by ingestion and by the HTTP surface.

mod metadata;
mod path_guard;
mod signature;

pub use metadata::{
    ffprobe_available, FfprobeExtractor, FilenameExtractor, MetadataError, MetadataExtractor,
    TrackMetadata,
};
pub use path_guard::PathGuard;
pub use signature::{hash_content, SignatureVerifier, DEFAULT_EXTENSIONS, DEFAULT_SIGNATURES};
