use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileConfig {
    pub system: SystemConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteConfig>,
    pub security: Option<SecurityConfig>,
    pub ingest: Option<IngestConfig>,
    pub jobs: Option<JobsConfig>,
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SystemConfig {
    pub port: Option<u16>,
    /// Shared admin key, sent by clients as `x-key`.
    pub key: Option<String>,
    pub ready: bool,
    pub logging_level: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub extensions: Option<Vec<String>>,
    /// Uppercase hex magic prefix to extension.
    pub signatures: Option<BTreeMap<String, String>>,
    pub download_throttle_mbps: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub watch_interval_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
    /// "ffprobe" or "none"
    pub metadata_extractor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub expiry_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_attempts: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// A config for a freshly initialized node: random admin key, default
    /// security settings, and `ready = false` so the operator reviews it
    /// before the node serves anything.
    pub fn generate_default(port: u16) -> Self {
        let signatures = crate::media::DEFAULT_SIGNATURES
            .iter()
            .map(|(prefix, ext)| (prefix.to_string(), ext.to_string()))
            .collect();

        FileConfig {
            system: SystemConfig {
                port: Some(port),
                key: Some(generate_key()),
                ready: false,
                logging_level: None,
            },
            remotes: vec![],
            security: Some(SecurityConfig {
                extensions: Some(
                    crate::media::DEFAULT_EXTENSIONS
                        .iter()
                        .map(|e| e.to_string())
                        .collect(),
                ),
                signatures: Some(signatures),
                download_throttle_mbps: Some(super::DEFAULT_DOWNLOAD_THROTTLE_MBPS),
            }),
            ingest: None,
            jobs: None,
            sync: None,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))
    }
}

/// 32 lowercase hex characters.
pub fn generate_key() -> String {
    format!("{:032x}", rand::random::<u128>())
}
