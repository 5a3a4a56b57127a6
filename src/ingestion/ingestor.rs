//! Admission rules for a single file: signature, content dedup and bitrate
//! arbitration between recordings of the same song.

use crate::library::{durations_match, normalize_tag, TrackIndex, TrackRecord, UNKNOWN_ARTIST};
use crate::media::{hash_content, MetadataExtractor, PathGuard, SignatureVerifier, TrackMetadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Index error: {0}")]
    Index(#[from] anyhow::Error),

    #[error("Path is outside the managed root: {0:?}")]
    OutsideRoot(PathBuf),

    #[error("Ingest queue is closed")]
    QueueClosed,
}

/// What a scan did with the file.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// The file is gone; its index entry (if any) was dropped.
    Removed,
    /// Extension not allowed or magic bytes do not match. File left alone.
    Rejected,
    /// Already admitted with the same content.
    Unchanged,
    /// Byte-identical to an admitted track; the new file was deleted.
    DuplicateContent { existing: String },
    /// Same recording as an admitted track with at least the same bitrate;
    /// the new file was deleted.
    LostArbitration { winner: String },
    /// Indexed. `superseded` lists admitted tracks it replaced.
    Admitted { superseded: Vec<String> },
}

pub struct Ingestor {
    guard: Arc<PathGuard>,
    index: Arc<dyn TrackIndex>,
    verifier: Arc<SignatureVerifier>,
    extractor: Arc<dyn MetadataExtractor>,
}

fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

async fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl Ingestor {
    pub fn new(
        guard: Arc<PathGuard>,
        index: Arc<dyn TrackIndex>,
        verifier: Arc<SignatureVerifier>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Self {
        Self {
            guard,
            index,
            verifier,
            extractor,
        }
    }

    fn relative(&self, path: &Path) -> Result<String, IngestError> {
        self.guard
            .relative(path)
            .ok_or_else(|| IngestError::OutsideRoot(path.to_path_buf()))
    }

    /// Drops the index entry of a removed file.
    pub fn remove(&self, path: &Path) -> Result<bool, IngestError> {
        let rel = self.relative(path)?;
        Ok(self.index.delete(&rel)?)
    }

    pub async fn scan(&self, path: &Path) -> Result<ScanOutcome, IngestError> {
        let rel = self.relative(path)?;

        if !tokio::fs::try_exists(path).await? {
            self.index.delete(&rel)?;
            return Ok(ScanOutcome::Removed);
        }

        if !self.verifier.verify_signature(path).await? {
            return Ok(ScanOutcome::Rejected);
        }

        let fs_metadata = tokio::fs::metadata(path).await?;
        let hash = hash_content(path).await?;

        if let Some(existing) = self.index.get(&rel)? {
            if existing.verified && existing.hash == hash {
                return Ok(ScanOutcome::Unchanged);
            }
        }

        if let Some(twin) = self.index.get_by_hash(&hash)? {
            if twin.path != rel {
                if tokio::fs::try_exists(self.guard.absolute(&twin.path)).await? {
                    remove_file_if_present(path).await?;
                    return Ok(ScanOutcome::DuplicateContent {
                        existing: twin.path,
                    });
                }
                debug!("Dropping stale index entry {}", twin.path);
                self.index.delete(&twin.path)?;
            }
        }

        let tags = match self.extractor.extract(path).await {
            Ok(tags) => tags,
            Err(err) => {
                warn!("Metadata extraction failed for {}: {}", rel, err);
                TrackMetadata::default()
            }
        };

        let title = tags
            .title
            .as_deref()
            .map(normalize_tag)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| normalize_tag(&s.to_string_lossy()))
                    .unwrap_or_default()
            });
        let artist = tags
            .artist
            .as_deref()
            .map(normalize_tag)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
        let duration = tags.duration.unwrap_or(0.0);
        let bitrate = tags.bitrate.unwrap_or(0);

        let mut superseded = Vec::new();
        if !title.is_empty() && duration > 0.0 {
            for candidate in self.index.find_by_metadata(&title, &artist)? {
                if candidate.path == rel || !durations_match(candidate.duration, duration) {
                    continue;
                }

                let candidate_path = self.guard.absolute(&candidate.path);
                if !tokio::fs::try_exists(&candidate_path).await? {
                    debug!("Dropping stale index entry {}", candidate.path);
                    self.index.delete(&candidate.path)?;
                    continue;
                }

                if bitrate > candidate.bitrate {
                    remove_file_if_present(&candidate_path).await?;
                    self.index.delete(&candidate.path)?;
                    superseded.push(candidate.path);
                } else {
                    remove_file_if_present(path).await?;
                    return Ok(ScanOutcome::LostArbitration {
                        winner: candidate.path,
                    });
                }
            }
        }

        self.index.put(&TrackRecord {
            path: rel,
            hash,
            size: fs_metadata.len(),
            mtime: modified_millis(&fs_metadata),
            title,
            artist,
            duration,
            bitrate,
            verified: true,
        })?;

        Ok(ScanOutcome::Admitted { superseded })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::library::SqliteLibraryStore;
    use crate::media::MetadataError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Serves canned metadata keyed by file name.
    #[derive(Default)]
    pub(crate) struct StubExtractor {
        pub by_name: HashMap<String, TrackMetadata>,
    }

    impl StubExtractor {
        pub fn with(mut self, name: &str, title: &str, artist: &str, duration: f64, bitrate: i64) -> Self {
            self.by_name.insert(
                name.to_string(),
                TrackMetadata {
                    title: Some(title.to_string()),
                    artist: Some(artist.to_string()),
                    duration: Some(duration),
                    bitrate: Some(bitrate),
                },
            );
            self
        }
    }

    #[async_trait]
    impl MetadataExtractor for StubExtractor {
        async fn extract(&self, path: &Path) -> Result<TrackMetadata, MetadataError> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            Ok(self.by_name.get(&name).cloned().unwrap_or_default())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl MetadataExtractor for FailingExtractor {
        async fn extract(&self, _path: &Path) -> Result<TrackMetadata, MetadataError> {
            Err(MetadataError::ProbeFailed("boom".to_string()))
        }
    }

    pub(crate) fn mp3_bytes(marker: &str) -> Vec<u8> {
        let mut bytes = b"ID3\x04\x00\x00".to_vec();
        bytes.extend_from_slice(marker.as_bytes());
        bytes
    }

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub store: Arc<SqliteLibraryStore>,
        pub ingestor: Ingestor,
    }

    impl Fixture {
        pub fn new(extractor: Arc<dyn MetadataExtractor>) -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join(".mrepo")).unwrap();
            let guard = Arc::new(PathGuard::new(dir.path(), ".mrepo").unwrap());
            let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
            let ingestor = Ingestor::new(
                guard,
                store.clone(),
                Arc::new(SignatureVerifier::default()),
                extractor,
            );
            Self {
                dir,
                store,
                ingestor,
            }
        }

        pub fn root(&self) -> PathBuf {
            self.dir.path().canonicalize().unwrap()
        }

        pub fn write(&self, rel: &str, bytes: &[u8]) -> PathBuf {
            let path = self.root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, bytes).unwrap();
            path
        }
    }

    #[tokio::test]
    async fn admits_new_track_with_normalized_tags() {
        let extractor = StubExtractor::default().with("a.mp3", "  My SONG ", "The Band", 200.0, 128_000);
        let fx = Fixture::new(Arc::new(extractor));
        let path = fx.write("music/a.mp3", &mp3_bytes("a"));

        let outcome = fx.ingestor.scan(&path).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Admitted { superseded: vec![] });

        let record = fx.store.get("music/a.mp3").unwrap().unwrap();
        assert_eq!(record.title, "my song");
        assert_eq!(record.artist, "the band");
        assert_eq!(record.duration, 200.0);
        assert_eq!(record.bitrate, 128_000);
        assert_eq!(record.size, mp3_bytes("a").len() as u64);
        assert!(record.verified);
    }

    #[tokio::test]
    async fn extraction_failure_uses_filename_defaults() {
        let fx = Fixture::new(Arc::new(FailingExtractor));
        let path = fx.write("My Song.mp3", &mp3_bytes("x"));

        fx.ingestor.scan(&path).await.unwrap();

        let record = fx.store.get("My Song.mp3").unwrap().unwrap();
        assert_eq!(record.title, "my song");
        assert_eq!(record.artist, UNKNOWN_ARTIST);
        assert_eq!(record.duration, 0.0);
        assert_eq!(record.bitrate, 0);
    }

    #[tokio::test]
    async fn byte_identical_copy_is_deleted() {
        let fx = Fixture::new(Arc::new(StubExtractor::default()));
        let original = fx.write("a.mp3", &mp3_bytes("same"));
        let copy = fx.write("copies/b.mp3", &mp3_bytes("same"));

        fx.ingestor.scan(&original).await.unwrap();
        let outcome = fx.ingestor.scan(&copy).await.unwrap();

        assert_eq!(
            outcome,
            ScanOutcome::DuplicateContent {
                existing: "a.mp3".to_string()
            }
        );
        assert!(!copy.exists());
        assert!(original.exists());
        assert_eq!(fx.store.list_verified().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_twin_entry_does_not_block_admission() {
        let fx = Fixture::new(Arc::new(StubExtractor::default()));
        let original = fx.write("a.mp3", &mp3_bytes("same"));
        fx.ingestor.scan(&original).await.unwrap();
        fs::remove_file(&original).unwrap();

        let moved = fx.write("moved/a.mp3", &mp3_bytes("same"));
        let outcome = fx.ingestor.scan(&moved).await.unwrap();

        assert_eq!(outcome, ScanOutcome::Admitted { superseded: vec![] });
        assert!(moved.exists());
        assert!(fx.store.get("a.mp3").unwrap().is_none());
        assert!(fx.store.get("moved/a.mp3").unwrap().is_some());
    }

    #[tokio::test]
    async fn higher_bitrate_supersedes_existing_track() {
        let extractor = StubExtractor::default()
            .with("low.mp3", "song", "band", 200.0, 128_000)
            .with("high.mp3", "Song", "BAND", 202.0, 320_000);
        let fx = Fixture::new(Arc::new(extractor));
        let low = fx.write("low.mp3", &mp3_bytes("low"));
        let high = fx.write("high.mp3", &mp3_bytes("high"));

        fx.ingestor.scan(&low).await.unwrap();
        let outcome = fx.ingestor.scan(&high).await.unwrap();

        assert_eq!(
            outcome,
            ScanOutcome::Admitted {
                superseded: vec!["low.mp3".to_string()]
            }
        );
        assert!(!low.exists());
        assert!(high.exists());
        let tracks = fx.store.list_verified().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].path, "high.mp3");
    }

    #[tokio::test]
    async fn lower_or_equal_bitrate_loses_arbitration() {
        let extractor = StubExtractor::default()
            .with("best.mp3", "song", "band", 200.0, 320_000)
            .with("worse.mp3", "song", "band", 198.0, 128_000)
            .with("same.mp3", "song", "band", 201.0, 320_000);
        let fx = Fixture::new(Arc::new(extractor));
        let best = fx.write("best.mp3", &mp3_bytes("best"));
        let worse = fx.write("worse.mp3", &mp3_bytes("worse"));
        let same = fx.write("same.mp3", &mp3_bytes("same"));

        fx.ingestor.scan(&best).await.unwrap();
        for candidate in [&worse, &same] {
            let outcome = fx.ingestor.scan(candidate).await.unwrap();
            assert_eq!(
                outcome,
                ScanOutcome::LostArbitration {
                    winner: "best.mp3".to_string()
                }
            );
            assert!(!candidate.exists());
        }

        assert!(best.exists());
        assert_eq!(fx.store.list_verified().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duration_window_boundary() {
        let extractor = StubExtractor::default()
            .with("a.mp3", "song", "band", 200.0, 128_000)
            .with("b.mp3", "song", "band", 205.0, 320_000)
            .with("c.mp3", "song", "band", 204.9, 64_000);
        let fx = Fixture::new(Arc::new(extractor));
        let a = fx.write("a.mp3", &mp3_bytes("a"));
        let b = fx.write("b.mp3", &mp3_bytes("b"));
        let c = fx.write("c.mp3", &mp3_bytes("c"));

        // Exactly 5 seconds apart: two different recordings.
        fx.ingestor.scan(&a).await.unwrap();
        let outcome = fx.ingestor.scan(&b).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Admitted { superseded: vec![] });
        assert!(a.exists() && b.exists());

        // 4.9 seconds from a and 0.1 from b: arbitration against both.
        let outcome = fx.ingestor.scan(&c).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::LostArbitration { .. }));
        assert!(!c.exists());
        assert_eq!(fx.store.list_verified().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tracks_without_duration_skip_arbitration() {
        let extractor = StubExtractor::default()
            .with("a.mp3", "song", "band", 0.0, 320_000)
            .with("b.mp3", "song", "band", 0.0, 64_000);
        let fx = Fixture::new(Arc::new(extractor));
        let a = fx.write("a.mp3", &mp3_bytes("a"));
        let b = fx.write("b.mp3", &mp3_bytes("b"));

        fx.ingestor.scan(&a).await.unwrap();
        fx.ingestor.scan(&b).await.unwrap();

        assert_eq!(fx.store.list_verified().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rescanning_unchanged_file_is_a_no_op() {
        let extractor = StubExtractor::default().with("a.mp3", "song", "band", 200.0, 128_000);
        let fx = Fixture::new(Arc::new(extractor));
        let path = fx.write("a.mp3", &mp3_bytes("a"));

        fx.ingestor.scan(&path).await.unwrap();
        let before = fx.store.get("a.mp3").unwrap();

        let outcome = fx.ingestor.scan(&path).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Unchanged);
        assert!(path.exists());
        assert_eq!(fx.store.get("a.mp3").unwrap(), before);
    }

    #[tokio::test]
    async fn changed_content_replaces_record() {
        let fx = Fixture::new(Arc::new(StubExtractor::default()));
        let path = fx.write("a.mp3", &mp3_bytes("v1"));
        fx.ingestor.scan(&path).await.unwrap();
        let first_hash = fx.store.get("a.mp3").unwrap().unwrap().hash;

        fs::write(&path, mp3_bytes("v2")).unwrap();
        let outcome = fx.ingestor.scan(&path).await.unwrap();

        assert_eq!(outcome, ScanOutcome::Admitted { superseded: vec![] });
        assert_ne!(fx.store.get("a.mp3").unwrap().unwrap().hash, first_hash);
    }

    #[tokio::test]
    async fn disguised_file_is_rejected_and_left_alone() {
        let fx = Fixture::new(Arc::new(StubExtractor::default()));
        let path = fx.write("fake.mp3", b"<html>definitely not audio</html>");

        let outcome = fx.ingestor.scan(&path).await.unwrap();

        assert_eq!(outcome, ScanOutcome::Rejected);
        assert!(path.exists());
        assert!(fx.store.get("fake.mp3").unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_drops_index_entry() {
        let fx = Fixture::new(Arc::new(StubExtractor::default()));
        let path = fx.write("a.mp3", &mp3_bytes("a"));
        fx.ingestor.scan(&path).await.unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(fx.ingestor.scan(&path).await.unwrap(), ScanOutcome::Removed);
        assert!(fx.store.get("a.mp3").unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_deletes_entry_and_rejects_outside_paths() {
        let fx = Fixture::new(Arc::new(StubExtractor::default()));
        let path = fx.write("a.mp3", &mp3_bytes("a"));
        fx.ingestor.scan(&path).await.unwrap();

        assert!(fx.ingestor.remove(&path).unwrap());
        assert!(!fx.ingestor.remove(&path).unwrap());
        assert!(matches!(
            fx.ingestor.remove(Path::new("/somewhere/else.mp3")),
            Err(IngestError::OutsideRoot(_))
        ));
    }
}
