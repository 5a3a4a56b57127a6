use serde::{Deserialize, Serialize};

/// Artist recorded when the file carries no artist tag.
pub const UNKNOWN_ARTIST: &str = "unknown";

/// A track known to the index, keyed by its root-relative path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub path: String,
    pub hash: String,
    pub size: u64,
    /// Modification time in unix milliseconds.
    pub mtime: i64,
    pub title: String,
    pub artist: String,
    /// Seconds, 0 when unknown.
    pub duration: f64,
    /// Bits per second, 0 when unknown.
    pub bitrate: i64,
    pub verified: bool,
}

/// Entry of the manifest a node exposes to its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestTrack {
    pub path: String,
    pub hash: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// Older peers omit the duration.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub bitrate: i64,
}

impl From<TrackRecord> for ManifestTrack {
    fn from(track: TrackRecord) -> Self {
        ManifestTrack {
            path: track.path,
            hash: track.hash,
            size: track.size,
            title: track.title,
            artist: track.artist,
            duration: Some(track.duration),
            bitrate: track.bitrate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub tracks: Vec<ManifestTrack>,
}

/// A peer node this node can pull from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    pub name: String,
    pub url: String,
    /// Unix milliseconds of the last completed reconciliation, 0 if never.
    pub last_sync: i64,
}

/// Normalization applied to titles and artists before they are stored or
/// compared.
pub fn normalize_tag(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Two tracks are considered the same recording when their durations are
/// closer than this many seconds.
pub const DURATION_MATCH_WINDOW_SECS: f64 = 5.0;

pub fn durations_match(a: f64, b: f64) -> bool {
    (a - b).abs() < DURATION_MATCH_WINDOW_SECS
}
