/*!
 * docker-volume-backup CLI
 */

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use dvb::config::{BackupConfig, Compression, LogLevel};
use dvb::error::{Result, EXIT_SUCCESS};
use dvb::logging;
use dvb::remote::{Location, NoRemote, RemoteStore};
use dvb::transfer::{Transfer, TransferOptions};
use dvb::volume::{DirectoryVolumes, DockerCli, VolumeGateway, VolumeStore};

#[derive(Parser)]
#[command(name = "docker-volume-backup")]
#[command(version, about = "Back up and restore Docker volumes as tar archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Serve volumes from subdirectories of DIR instead of Docker
    #[arg(long, value_name = "DIR", global = true)]
    volume_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive a volume to a file or s3://bucket/key
    Backup {
        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Compression for the archive [default: gz]
        #[arg(long, value_enum)]
        compress: Option<CompressionArg>,

        /// Volume to back up
        volume: String,

        /// Destination path or s3://bucket/key
        destination: String,
    },

    /// Restore an archive into a volume
    Restore {
        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Clear and restore into an existing volume
        #[arg(long)]
        overwrite: bool,

        /// Archive path or s3://bucket/key
        source: String,

        /// Target volume
        volume: String,
    },

    /// List the entries of an archive
    List {
        /// Archive path or s3://bucket/key
        source: String,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CompressionArg {
    None,
    #[value(alias = "gzip")]
    Gz,
    #[value(alias = "zst")]
    Zstd,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => Compression::None,
            CompressionArg::Gz => Compression::Gzip,
            CompressionArg::Zstd => Compression::Zstd,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => BackupConfig::from_file(path)?,
        None => BackupConfig::default(),
    };

    // CLI flags override the file
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose = config.verbose || cli.verbose;
    if cli.volume_root.is_some() {
        config.volume_root = cli.volume_root.clone();
    }

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let (store, gateway) = volume_backend(&config);

    match cli.command {
        Commands::Backup {
            progress,
            compress,
            volume,
            destination,
        } => {
            config.show_progress = config.show_progress || progress;
            let compression = compress.map(Compression::from).unwrap_or(config.compression);
            let remote = volume_remote(store.as_ref(), &config, &volume, &destination)?;
            let report = Transfer::new(store.as_ref(), gateway.as_ref(), remote.as_ref())
                .with_options(TransferOptions::from(&config))
                .backup(&volume, &destination, compression)?;
            println!("{}", report);
        }
        Commands::Restore {
            progress,
            overwrite,
            source,
            volume,
        } => {
            config.show_progress = config.show_progress || progress;
            let remote = volume_remote(store.as_ref(), &config, &volume, &source)?;
            let report = Transfer::new(store.as_ref(), gateway.as_ref(), remote.as_ref())
                .with_options(TransferOptions::from(&config))
                .restore(&source, &volume, overwrite)?;
            println!("{}", report);
        }
        Commands::List { source } => {
            let remote = remote_backend(&config, &source)?;
            let entries = Transfer::new(store.as_ref(), gateway.as_ref(), remote.as_ref())
                .with_options(TransferOptions::from(&config))
                .list(&source)?;
            for entry in &entries {
                let target = entry
                    .link_target
                    .as_ref()
                    .map(|t| format!(" -> {}", t.display()))
                    .unwrap_or_default();
                println!(
                    "{:<8} {:>12} {:o} {}{}",
                    entry.kind.to_string(),
                    entry.size,
                    entry.mode,
                    entry.path.display(),
                    target
                );
            }
            println!("{} entries", entries.len());
        }
    }

    Ok(())
}

type Backend = (Box<dyn VolumeStore>, Box<dyn VolumeGateway>);

fn volume_backend(config: &BackupConfig) -> Backend {
    match config.volume_root {
        Some(ref root) => {
            let volumes = DirectoryVolumes::new(root);
            let gateway = volumes.gateway();
            (Box::new(volumes), Box::new(gateway))
        }
        None => {
            let docker = DockerCli::new(config.docker.clone());
            (Box::new(docker.clone()), Box::new(docker))
        }
    }
}

/// Remote backend for a volume transfer; the volume name is checked before
/// any client setup
fn volume_remote(
    store: &dyn VolumeStore,
    config: &BackupConfig,
    volume: &str,
    path: &str,
) -> Result<Box<dyn RemoteStore>> {
    store.validate_name(volume)?;
    remote_backend(config, path)
}

/// The object store client is only built when a path needs it
fn remote_backend(config: &BackupConfig, path: &str) -> Result<Box<dyn RemoteStore>> {
    if !path.starts_with(dvb::remote::SCHEME) {
        return Ok(Box::new(NoRemote));
    }
    // Reject malformed paths before any client setup
    Location::parse(path)?;
    s3_backend(config)
}

#[cfg(feature = "s3")]
fn s3_backend(config: &BackupConfig) -> Result<Box<dyn RemoteStore>> {
    Ok(Box::new(dvb::remote::S3Remote::new(&config.remote)?))
}

#[cfg(not(feature = "s3"))]
fn s3_backend(_config: &BackupConfig) -> Result<Box<dyn RemoteStore>> {
    Err(dvb::error::BackupError::Config(
        "s3:// paths need a build with the `s3` feature".to_string(),
    ))
}
