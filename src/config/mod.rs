mod file_config;

pub use file_config::{
    generate_key, FileConfig, IngestConfig, JobsConfig, RemoteConfig, SecurityConfig, SyncConfig,
    SystemConfig,
};

use crate::archive_jobs::DEFAULT_JOB_EXPIRY;
use crate::ingestion::DEFAULT_QUEUE_CAPACITY;
use crate::server::RequestsLoggingLevel;
use crate::sync::SyncSettings;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the system directory under the managed root. Never watched,
/// never served.
pub const SYSTEM_DIR_NAME: &str = ".mrepo";
pub const CONFIG_FILE_NAME: &str = "conf.toml";
pub const IMPORTS_DIR_NAME: &str = "imports";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DOWNLOAD_THROTTLE_MBPS: f64 = 5.0;
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// CLI arguments that can be used for config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub root: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataExtractorKind {
    Ffprobe,
    None,
}

#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub extensions: Vec<String>,
    pub signatures: BTreeMap<String, String>,
    pub download_throttle_mbps: f64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            extensions: crate::media::DEFAULT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            signatures: crate::media::DEFAULT_SIGNATURES
                .iter()
                .map(|(prefix, ext)| (prefix.to_string(), ext.to_string()))
                .collect(),
            download_throttle_mbps: DEFAULT_DOWNLOAD_THROTTLE_MBPS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub watch_interval: Duration,
    pub queue_capacity: usize,
    pub metadata_extractor: MetadataExtractorKind,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            watch_interval: DEFAULT_WATCH_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            metadata_extractor: MetadataExtractorKind::Ffprobe,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub root: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub admin_key: String,
    pub remotes: Vec<RemoteConfig>,
    pub security: SecuritySettings,
    pub ingest: IngestSettings,
    pub job_expiry: Duration,
    pub sync: SyncSettings,
    pub request_timeout: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let root = cli.root.clone();
        if !root.exists() {
            bail!("Managed root does not exist: {:?}", root);
        }
        if !root.is_dir() {
            bail!("Managed root is not a directory: {:?}", root);
        }

        let port = file.system.port.unwrap_or(cli.port);
        let logging_level = file
            .system
            .logging_level
            .as_deref()
            .and_then(parse_logging_level)
            .unwrap_or_else(|| cli.logging_level.clone());

        let admin_key = match file.system.key {
            Some(key) if !key.trim().is_empty() => key,
            _ => bail!("system.key must be set in the config file"),
        };

        let security_file = file.security.unwrap_or_default();
        let security_defaults = SecuritySettings::default();
        let security = SecuritySettings {
            extensions: security_file
                .extensions
                .unwrap_or(security_defaults.extensions),
            signatures: security_file
                .signatures
                .unwrap_or(security_defaults.signatures),
            download_throttle_mbps: security_file
                .download_throttle_mbps
                .unwrap_or(security_defaults.download_throttle_mbps),
        };

        let ingest_file = file.ingest.unwrap_or_default();
        let metadata_extractor = match ingest_file.metadata_extractor.as_deref() {
            None => MetadataExtractorKind::Ffprobe,
            Some(value) => parse_metadata_extractor(value)?,
        };
        let ingest = IngestSettings {
            watch_interval: ingest_file
                .watch_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WATCH_INTERVAL),
            queue_capacity: ingest_file
                .queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY)
                .max(1),
            metadata_extractor,
        };

        let job_expiry = file
            .jobs
            .and_then(|jobs| jobs.expiry_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JOB_EXPIRY);

        let sync_file = file.sync.unwrap_or_default();
        let sync_defaults = SyncSettings::default();
        let sync = SyncSettings {
            batch_size: sync_file.batch_size.unwrap_or(sync_defaults.batch_size).max(1),
            poll_interval: sync_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(sync_defaults.poll_interval),
            max_poll_attempts: sync_file
                .max_poll_attempts
                .unwrap_or(sync_defaults.max_poll_attempts),
        };
        let request_timeout = sync_file
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        Ok(Self {
            root,
            port,
            logging_level,
            admin_key,
            remotes: file.remotes,
            security,
            ingest,
            job_expiry,
            sync,
            request_timeout,
        })
    }

    pub fn system_dir(&self) -> PathBuf {
        self.root.join(SYSTEM_DIR_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.system_dir().join("core.db")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.system_dir().join("tmp")
    }

    pub fn imports_dir(&self) -> PathBuf {
        self.root.join(IMPORTS_DIR_NAME)
    }
}

pub fn default_config_path(root: &Path) -> PathBuf {
    root.join(SYSTEM_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// What start-up found on disk.
#[derive(Debug)]
pub enum Bootstrap {
    /// No config existed; a default one with this key was written.
    Generated { key: String },
    /// The config exists but has not been marked ready.
    NotReady,
    Ready(FileConfig),
}

/// Creates the node's directories and loads its config file, writing a
/// default one on first start.
pub fn bootstrap(root: &Path, config_path: &Path, port: u16) -> Result<Bootstrap> {
    for dir in [
        root.join(SYSTEM_DIR_NAME),
        root.join(SYSTEM_DIR_NAME).join("tmp"),
        root.join(IMPORTS_DIR_NAME),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;
    }

    if !config_path.exists() {
        let generated = FileConfig::generate_default(port);
        generated.write(config_path)?;
        let key = generated.system.key.unwrap_or_default();
        return Ok(Bootstrap::Generated { key });
    }

    let file_config = FileConfig::load(config_path)?;
    if !file_config.system.ready {
        return Ok(Bootstrap::NotReady);
    }
    Ok(Bootstrap::Ready(file_config))
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

fn parse_metadata_extractor(s: &str) -> Result<MetadataExtractorKind> {
    match s.trim().to_lowercase().as_str() {
        "ffprobe" => Ok(MetadataExtractorKind::Ffprobe),
        "none" => Ok(MetadataExtractorKind::None),
        other => bail!("Unknown metadata extractor {:?}, expected ffprobe or none", other),
    }
}
