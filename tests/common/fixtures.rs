//! Test library fixtures
//!
//! Writes small files that pass the default signature checks.

use super::constants::*;
use std::path::Path;

/// Returns `size` bytes starting with an ID3 tag, with `seed` mixed into the
/// payload so different seeds hash differently.
pub fn fake_mp3(seed: u8, size: usize) -> Vec<u8> {
    let mut bytes = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
    bytes.extend((0..size.saturating_sub(bytes.len())).map(|i| (i as u8).wrapping_mul(31) ^ seed));
    bytes
}

/// Writes `content` at `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, content: &[u8]) -> std::io::Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

/// Seeds the default two-track library.
pub fn create_test_library(root: &Path) -> std::io::Result<()> {
    write_file(root, TRACK_1_PATH, &fake_mp3(1, TRACK_SIZE_BYTES))?;
    write_file(root, TRACK_2_PATH, &fake_mp3(2, TRACK_SIZE_BYTES))?;
    Ok(())
}
