//! File type and content identity checks.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Number of leading bytes compared against the magic prefixes.
const SIGNATURE_PROBE_LEN: u64 = 12;

const HASH_CHUNK_SIZE: usize = 1024 * 1024;

pub const DEFAULT_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a", ".opus"];

/// Magic prefix (uppercase hex) to extension.
pub const DEFAULT_SIGNATURES: &[(&str, &str)] = &[
    ("494433", "mp3"),
    ("FFF3", "mp3"),
    ("FFF2", "mp3"),
    ("524946", "wav"),
    ("664C61", "flac"),
    ("4F6767", "ogg"),
    ("000000", "m4a"),
];

/// Checks that a file's extension is allowed and that its leading bytes
/// agree with what the extension claims.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    extensions: HashSet<String>,
    prefixes_by_extension: HashMap<String, Vec<String>>,
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

impl SignatureVerifier {
    pub fn new(extensions: &[String], signatures: &BTreeMap<String, String>) -> Self {
        let extensions = extensions.iter().map(|e| normalize_extension(e)).collect();

        let mut prefixes_by_extension: HashMap<String, Vec<String>> = HashMap::new();
        for (prefix, ext) in signatures {
            prefixes_by_extension
                .entry(normalize_extension(ext))
                .or_default()
                .push(prefix.trim().to_uppercase());
        }

        Self {
            extensions,
            prefixes_by_extension,
        }
    }

    pub fn extension_of(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
    }

    pub fn is_allowed_extension(&self, path: &Path) -> bool {
        Self::extension_of(path)
            .map(|ext| self.extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// True if the extension is allowed and, when the extension has
    /// registered magic prefixes, the file starts with one of them.
    /// Extensions without registered prefixes are accepted unchecked.
    pub async fn verify_signature(&self, path: &Path) -> io::Result<bool> {
        let ext = match Self::extension_of(path) {
            Some(ext) if self.extensions.contains(&ext) => ext,
            _ => return Ok(false),
        };

        let prefixes = match self.prefixes_by_extension.get(&ext) {
            Some(prefixes) if !prefixes.is_empty() => prefixes,
            _ => return Ok(true),
        };

        let file = tokio::fs::File::open(path).await?;
        let mut head = Vec::with_capacity(SIGNATURE_PROBE_LEN as usize);
        file.take(SIGNATURE_PROBE_LEN).read_to_end(&mut head).await?;

        let head_hex: String = head.iter().map(|b| format!("{:02X}", b)).collect();
        Ok(prefixes.iter().any(|prefix| head_hex.starts_with(prefix)))
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        let extensions: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        let signatures: BTreeMap<String, String> = DEFAULT_SIGNATURES
            .iter()
            .map(|(prefix, ext)| (prefix.to_string(), ext.to_string()))
            .collect();
        Self::new(&extensions, &signatures)
    }
}

/// Lower-case hex SHA-256 of the file contents, streamed in fixed-size
/// chunks on a blocking thread.
pub async fn hash_content(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn accepts_matching_magic_bytes() {
        let dir = TempDir::new().unwrap();
        let verifier = SignatureVerifier::default();

        let id3 = dir.path().join("tagged.mp3");
        fs::write(&id3, b"ID3\x04\x00rest of the file").unwrap();
        assert!(verifier.verify_signature(&id3).await.unwrap());

        let frame_sync = dir.path().join("raw.MP3");
        fs::write(&frame_sync, [0xFF, 0xF3, 0x90, 0x00]).unwrap();
        assert!(verifier.verify_signature(&frame_sync).await.unwrap());

        let flac = dir.path().join("song.flac");
        fs::write(&flac, b"fLaC\x00\x00\x00\x22").unwrap();
        assert!(verifier.verify_signature(&flac).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_disguised_file() {
        let dir = TempDir::new().unwrap();
        let verifier = SignatureVerifier::default();

        let fake = dir.path().join("fake.mp3");
        fs::write(&fake, b"<html>not audio</html>").unwrap();
        assert!(!verifier.verify_signature(&fake).await.unwrap());

        let empty = dir.path().join("empty.flac");
        fs::write(&empty, b"").unwrap();
        assert!(!verifier.verify_signature(&empty).await.unwrap());
    }

    #[tokio::test]
    async fn extension_rules() {
        let dir = TempDir::new().unwrap();
        let verifier = SignatureVerifier::default();

        // Allowed but without registered prefixes.
        let opus = dir.path().join("voice.opus");
        fs::write(&opus, b"anything").unwrap();
        assert!(verifier.verify_signature(&opus).await.unwrap());

        let text = dir.path().join("notes.txt");
        fs::write(&text, b"ID3").unwrap();
        assert!(!verifier.verify_signature(&text).await.unwrap());

        let bare = dir.path().join("README");
        fs::write(&bare, b"ID3").unwrap();
        assert!(!verifier.verify_signature(&bare).await.unwrap());
    }

    #[tokio::test]
    async fn custom_configuration() {
        let dir = TempDir::new().unwrap();
        let mut signatures = BTreeMap::new();
        signatures.insert("cafe".to_string(), ".bin".to_string());
        let verifier = SignatureVerifier::new(&["BIN".to_string()], &signatures);

        let good = dir.path().join("a.bin");
        fs::write(&good, [0xCA, 0xFE, 0x01]).unwrap();
        assert!(verifier.verify_signature(&good).await.unwrap());

        let bad = dir.path().join("b.bin");
        fs::write(&bad, [0xBE, 0xEF]).unwrap();
        assert!(!verifier.verify_signature(&bad).await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let verifier = SignatureVerifier::default();
        assert!(verifier
            .verify_signature(&dir.path().join("gone.mp3"))
            .await
            .is_err());
        assert!(hash_content(&dir.path().join("gone.mp3")).await.is_err());
    }

    #[tokio::test]
    async fn hashes_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.bin");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            hash_content(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let big = dir.path().join("big.bin");
        fs::write(&big, vec![7u8; HASH_CHUNK_SIZE * 2 + 3]).unwrap();
        let copy = dir.path().join("big_copy.bin");
        fs::copy(&big, &copy).unwrap();
        assert_eq!(
            hash_content(&big).await.unwrap(),
            hash_content(&copy).await.unwrap()
        );
    }
}
