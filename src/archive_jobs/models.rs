use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveJobStatus {
    Processing,
    Ready,
    Error,
}

impl ArchiveJobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ArchiveJobStatus::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveJob {
    pub id: String,
    pub status: ArchiveJobStatus,
    pub path: PathBuf,
}
