//! Test server lifecycle management
//!
//! Each test gets an isolated node with its own managed root and database.

#![allow(dead_code)]

use super::constants::*;
use super::fixtures::create_test_library;
use mrepo::config::{AppConfig, CliConfig, FileConfig, IngestConfig, SyncConfig, SystemConfig};
use mrepo::media::FilenameExtractor;
use mrepo::server::RequestsLoggingLevel;
use mrepo::{make_app, Node};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test node instance with an isolated managed root
///
/// When dropped, the HTTP server gracefully shuts down and the root is removed.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// The running node, for direct access to its stores in tests
    pub node: Node,

    // Private fields - keep resources alive until drop
    _temp_root: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a node seeded with the default two-track library
    pub async fn spawn() -> Self {
        Self::spawn_with(create_test_library).await
    }

    /// Spawns a node with an empty managed root
    pub async fn spawn_empty() -> Self {
        Self::spawn_with(|_| Ok(())).await
    }

    /// Spawns a node after letting `seed` populate its managed root
    ///
    /// # Panics
    ///
    /// Panics if the root cannot be prepared, the node fails to start, or the
    /// server doesn't become ready within timeout.
    pub async fn spawn_with<F>(seed: F) -> Self
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        let temp_root = TempDir::new().expect("Failed to create temp root");
        seed(temp_root.path()).expect("Failed to seed managed root");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let file_config = FileConfig {
            system: SystemConfig {
                key: Some(ADMIN_KEY.to_string()),
                ready: true,
                ..Default::default()
            },
            ingest: Some(IngestConfig {
                watch_interval_ms: Some(WATCH_INTERVAL_MS),
                metadata_extractor: Some("none".to_string()),
                ..Default::default()
            }),
            sync: Some(SyncConfig {
                poll_interval_ms: Some(JOB_POLL_INTERVAL_MS),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cli_config = CliConfig {
            root: temp_root.path().to_path_buf(),
            port,
            logging_level: RequestsLoggingLevel::None,
        };
        let config =
            AppConfig::resolve(&cli_config, Some(file_config)).expect("Failed to resolve config");

        let node =
            Node::start(&config, Arc::new(FilenameExtractor)).expect("Failed to start node");
        let app = make_app(node.state());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            node,
            _temp_root: temp_root,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// The node's managed root directory
    pub fn root(&self) -> PathBuf {
        self._temp_root.path().to_path_buf()
    }

    /// Number of tracks the node reports on its home endpoint
    pub async fn track_count(&self) -> u64 {
        let body: serde_json::Value = reqwest::get(format!("{}/", self.base_url))
            .await
            .expect("Home request failed")
            .json()
            .await
            .expect("Home response is not JSON");
        body["tracks"].as_u64().expect("Missing track count")
    }

    /// Waits until the node has indexed exactly `expected` tracks
    pub async fn wait_for_tracks(&self, expected: u64) {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(EVENTUALLY_TIMEOUT_MS);
        loop {
            let count = self.track_count().await;
            if count == expected {
                return;
            }
            if start.elapsed() > timeout {
                panic!("Expected {} tracks, node still has {}", expected, count);
            }
            tokio::time::sleep(Duration::from_millis(WATCH_INTERVAL_MS)).await;
        }
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
