//! Command-line interface for pktwatch.
//!
//! `pktwatch <service>` runs one pipeline stage; `pktwatch all` runs every
//! stage in one process, still talking over loopback HTTP.

use crate::application::{Application, Service};
use crate::capture::Recording;
use crate::classifier::classify;
use crate::core::config::ConfigBuilder;
use crate::core::{Config, Origin, PktwatchError, Result};
use crate::storage;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Network telemetry pipeline: capture, classify and persist packet metadata
#[derive(Parser, Debug)]
#[command(name = "pktwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file path (default: ~/.config/pktwatch/config.yaml)
    #[arg(short, long, global = true, env = "PKTWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, env = "PKTWATCH_DEBUG")]
    pub debug: bool,

    /// SQLite database file
    #[arg(long, global = true, env = "PKTWATCH_DATABASE")]
    pub database: Option<PathBuf>,

    /// Directory holding recordings for replay
    #[arg(long, global = true, env = "PKTWATCH_PCAP_DIR")]
    pub pcap_dir: Option<PathBuf>,

    /// Interface for live capture (default: auto-detect)
    #[arg(short, long, global = true, env = "PKTWATCH_INTERFACE")]
    pub interface: Option<String>,

    /// Where capture posts frames
    #[arg(long, global = true, env = "PKTWATCH_PARSER_URL")]
    pub parser_url: Option<String>,

    /// Where the parser posts records
    #[arg(long, global = true, env = "PKTWATCH_PERSISTOR_URL")]
    pub persistor_url: Option<String>,

    /// Frames per capture post (1 = send immediately)
    #[arg(short, long, global = true, env = "PKTWATCH_BATCH_SIZE")]
    pub batch_size: Option<usize>,
}

/// What to run.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Capture control service
    Capture,
    /// Classification service
    Parser,
    /// Persistence service
    Persistor,
    /// Query service
    Analyzer,
    /// Every service in one process
    All,
    /// Create or upgrade the database schema and exit
    InitDb,
    /// Classify a recording locally and print records as JSON lines
    Replay {
        /// pcap or pcapng file
        file: PathBuf,
    },
    /// Validate configuration and exit
    CheckConfig,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables
    /// 2. Config file
    /// 3. Defaults
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("pktwatch").join("config.yaml"))
                .filter(|p| p.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => builder = builder.from_yaml(&content)?,
                Err(e) => {
                    return Err(PktwatchError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                },
            }
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(path) = &self.database {
            builder = builder.database(path.clone());
        }
        if let Some(dir) = &self.pcap_dir {
            builder = builder.pcap_dir(dir.clone());
        }
        if let Some(interface) = &self.interface {
            builder = builder.interface(interface.clone());
        }
        if let Some(url) = &self.parser_url {
            builder = builder.parser_url(url.clone());
        }
        if let Some(url) = &self.persistor_url {
            builder = builder.persistor_url(url.clone());
        }
        if let Some(size) = self.batch_size {
            builder = builder.batch_size(size);
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging.
    ///
    /// `RUST_LOG` wins, then `PKTWATCH_LOG_LEVEL`, then the configured level
    /// (`debug` under `--debug`).
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = std::env::var("PKTWATCH_LOG_LEVEL").unwrap_or_else(|_| config.log_filter().to_string());
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.logging.structured {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true)
                        .compact(),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .compact(),
                )
                .try_init()
        };

        result.map_err(|e| PktwatchError::config(format!("Failed to initialize logging: {}", e)))
    }
}

/// Execute the parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    match &cli.command {
        Command::CheckConfig => {
            println!("Configuration is valid!");
            println!("  Capture:    {}:{}", config.server.bind_address, config.server.capture_port);
            println!("  Parser:     {}:{}", config.server.bind_address, config.server.parser_port);
            println!("  Persistor:  {}:{}", config.server.bind_address, config.server.persistor_port);
            println!("  Analyzer:   {}:{}", config.server.bind_address, config.server.analyzer_port);
            println!("  Database:   {}", config.storage.database.display());
            println!("  Recordings: {}", config.capture.pcap_dir.display());
            println!(
                "  Parser retry: {} attempts, {:?} apart, then {:?}",
                config.parser.retry.max_attempts, config.parser.retry.delay, config.parser.retry.on_exhausted
            );
            Ok(())
        },
        Command::InitDb => init_db(&config).await,
        Command::Replay { file } => replay(file),
        Command::Capture => run(config, vec![Service::Capture]).await,
        Command::Parser => run(config, vec![Service::Parser]).await,
        Command::Persistor => run(config, vec![Service::Persistor]).await,
        Command::Analyzer => run(config, vec![Service::Analyzer]).await,
        Command::All => run(config, Service::ALL.to_vec()).await,
    }
}

async fn run(config: Config, services: Vec<Service>) -> Result<()> {
    Application::new(config, services)?.run().await
}

async fn init_db(config: &Config) -> Result<()> {
    let (_, report) = storage::open(&config.storage).await?;

    println!("Schema ready in {}", config.storage.database.display());
    println!("  applied: {}", report.applied.join(", "));
    if !report.skipped.is_empty() {
        println!("  skipped: {}", report.skipped.join(", "));
    }
    for (step, error) in &report.failed {
        println!("  failed:  {} ({})", step, error);
    }
    Ok(())
}

/// Classify every frame of `file`, one JSON record per line on stdout.
fn replay(file: &Path) -> Result<()> {
    let mut recording = Recording::open(file)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    while let Some(observed) = recording.next_frame()? {
        let record = classify(&observed.into_raw_frame(Origin::Pcap));
        serde_json::to_writer(&mut out, &record)?;
        writeln!(out)?;
    }

    tracing::info!("Replayed {} frames from {}", recording.frames(), file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["pktwatch", "persistor", "--database", "/tmp/x.db"]).unwrap();
        assert_eq!(cli.command, Command::Persistor);
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));

        let cli = Cli::try_parse_from(["pktwatch", "--debug", "replay", "trace.pcap"]).unwrap();
        assert!(cli.debug);
        assert_eq!(cli.command, Command::Replay { file: PathBuf::from("trace.pcap") });

        let cli = Cli::try_parse_from(["pktwatch", "init-db"]).unwrap();
        assert_eq!(cli.command, Command::InitDb);

        assert!(Cli::try_parse_from(["pktwatch"]).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from(["pktwatch", "all", "--batch-size", "10", "--pcap-dir", "/data"]).unwrap();
        let config = cli.build_config_from_args(ConfigBuilder::new()).unwrap();
        assert_eq!(config.capture.batch_size, 10);
        assert_eq!(config.capture.pcap_dir, PathBuf::from("/data"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::try_parse_from(["pktwatch", "capture", "--batch-size", "0"]).unwrap();
        assert!(cli.build_config_from_args(ConfigBuilder::new()).is_err());
    }
}
