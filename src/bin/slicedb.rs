//! SliceDB command-line tool
//!
//! # Examples
//!
//! ```bash
//! # Back up a frame to a file
//! slicedb --data-dir /var/lib/slicedb backup -d mydb -f myframe -o backup.jsonl
//!
//! # Back up to stdout
//! slicedb backup -d mydb -f myframe > backup.jsonl
//! ```

use clap::{Args, Parser, Subcommand};
use slicedb::ctl::BackupCommand;
use slicedb::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// SliceDB - slice-partitioned view storage for bitmap indexes
#[derive(Parser, Debug)]
#[command(name = "slicedb")]
#[command(version = slicedb::VERSION)]
#[command(about = "SliceDB - slice-partitioned view storage for bitmap indexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SLICEDB_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory path
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backup data from slicedb
    Backup(BackupArgs),

    /// Show version
    Version,
}

/// Backs up the database and frame into a single file
#[derive(Args, Debug)]
struct BackupArgs {
    /// host:port of slicedb
    #[arg(long, default_value = "localhost:15000")]
    host: String,

    /// Database to back up
    #[arg(short, long, default_value = "")]
    database: String,

    /// Frame to back up
    #[arg(short, long, default_value = "")]
    frame: String,

    /// File to write backup to - default stdout
    #[arg(short, long = "output-file")]
    output_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(log_dir) = &cli.log_dir {
        config.log_dir = log_dir.clone();
    }
    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone();
    }

    setup_logging(&config, cli.no_color)?;

    match cli.command {
        Commands::Backup(args) => backup_command(config, args).await,
        Commands::Version => {
            println!("slicedb {}", slicedb::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
///
/// Console logs go to stderr so a backup streamed to stdout stays clean.
fn setup_logging(config: &Config, no_color: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "slicedb.log");

    let log_level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Backup command
async fn backup_command(config: Config, args: BackupArgs) -> anyhow::Result<()> {
    let mut cmd = BackupCommand::new(&config.data_dir);
    cmd.host = args.host;
    cmd.database = args.database;
    cmd.frame = args.frame;
    cmd.path = args.output_file;

    info!(data_dir = %config.data_dir.display(), "Running backup");
    cmd.run().await?;
    Ok(())
}
