mod manager;
mod models;

pub use manager::{JobManager, PackagingError, DEFAULT_JOB_EXPIRY};
pub use models::{ArchiveJob, ArchiveJobStatus};
