use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mrepo::config::{
    bootstrap, default_config_path, AppConfig, Bootstrap, CliConfig, MetadataExtractorKind,
    DEFAULT_PORT,
};
use mrepo::media::{ffprobe_available, FfprobeExtractor, FilenameExtractor, MetadataExtractor};
use mrepo::{run_server, Node, RequestsLoggingLevel};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// The managed root directory. Defaults to the current directory.
    #[clap(long, value_parser = parse_path)]
    pub root: Option<PathBuf>,

    /// Path to the TOML config file. Defaults to <root>/.mrepo/conf.toml.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

async fn choose_extractor(kind: MetadataExtractorKind) -> Arc<dyn MetadataExtractor> {
    match kind {
        MetadataExtractorKind::Ffprobe if ffprobe_available().await => {
            info!("Using ffprobe for metadata extraction");
            Arc::new(FfprobeExtractor)
        }
        MetadataExtractorKind::Ffprobe => {
            warn!("ffprobe not found, falling back to file names for metadata");
            Arc::new(FilenameExtractor)
        }
        MetadataExtractorKind::None => Arc::new(FilenameExtractor),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let root = match cli_args.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let config_path = cli_args
        .config
        .unwrap_or_else(|| default_config_path(&root));

    let file_config = match bootstrap(&root, &config_path, cli_args.port)? {
        Bootstrap::Generated { key } => {
            info!("Generated config at {:?}", config_path);
            info!("Admin key: {}", key);
            info!("Set `ready = true` under [system] to start the node.");
            return Ok(());
        }
        Bootstrap::NotReady => {
            info!(
                "Config {:?} is not marked ready, set `ready = true` under [system] to start.",
                config_path
            );
            return Ok(());
        }
        Bootstrap::Ready(file_config) => file_config,
    };

    let cli_config = CliConfig {
        root,
        port: cli_args.port,
        logging_level: cli_args.logging_level,
    };
    let app_config = AppConfig::resolve(&cli_config, Some(file_config))?;

    let extractor = choose_extractor(app_config.ingest.metadata_extractor).await;
    let node = Node::start(&app_config, extractor)?;

    info!(
        "Serving {:?} on port {} (admin key from {:?})",
        app_config.root, app_config.port, config_path
    );
    let served = run_server(node.state(), shutdown_signal()).await;
    node.shutdown().await;
    served
}
