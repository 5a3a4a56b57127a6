//! Common test infrastructure
//!
//! Spawns real nodes on random ports and talks to them over HTTP.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestClient, TestServer, TRACK_1_PATH};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_stream() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     let response = client.stream(TRACK_1_PATH, None).await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{fake_mp3, write_file};
pub use server::TestServer;
