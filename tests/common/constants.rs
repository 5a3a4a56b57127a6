//! Shared constants for end-to-end tests
//!
//! When the seeded library or timings change, update only this file.

#![allow(dead_code)]

// ============================================================================
// Admin
// ============================================================================

/// Admin key every test node is configured with
pub const ADMIN_KEY: &str = "test-admin-key";

// ============================================================================
// Seeded Library
// ============================================================================

/// First track written into every fresh test node
pub const TRACK_1_PATH: &str = "music/first.mp3";

/// Second track written into every fresh test node
pub const TRACK_2_PATH: &str = "music/nested/second.mp3";

/// Number of tracks seeded into every fresh test node
pub const SEEDED_TRACK_COUNT: u64 = 2;

/// Size of each seeded track in bytes
pub const TRACK_SIZE_BYTES: usize = 4096;

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How often test nodes rescan their root (milliseconds)
pub const WATCH_INTERVAL_MS: u64 = 50;

/// How often test nodes poll a peer's archive job (milliseconds)
pub const JOB_POLL_INTERVAL_MS: u64 = 50;

/// Upper bound for background work a test waits on (milliseconds)
pub const EVENTUALLY_TIMEOUT_MS: u64 = 10_000;
