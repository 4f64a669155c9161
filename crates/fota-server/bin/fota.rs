//! FOTA server binary entry point.
//!
//! This is a thin wrapper around the fota-server library with three
//! subcommands:
//! 1. `serve` runs the HTTP server
//! 2. `upload` ingests a binary into the firmware directory
//! 3. `doctor` checks the catalog against the files on disk

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fota_server::doctor::{self, DocumentHealth, Verify};
use fota_server::{Ingestor, Server, ServerConfig, StorageConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fota",
    about = "Firmware-over-the-air repository server",
    version,
    long_about = "Serves versioned firmware binaries to devices over HTTP and manages the catalog they are published in."
)]
struct Cli {
    /// Override the log level (defaults to RUST_LOG, then info)
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the firmware server
    Serve(ServerConfig),

    /// Publish a firmware binary into the catalog
    Upload(UploadArgs),

    /// Check the catalog against the firmware directory
    Doctor(DoctorArgs),
}

#[derive(Args)]
struct UploadArgs {
    /// Firmware binary to publish
    file: PathBuf,

    /// Firmware version (dot-separated integers)
    #[arg(long)]
    version: String,

    /// Device type the firmware is built for
    #[arg(long)]
    device_type: String,

    /// Release notes
    #[arg(long, default_value = "")]
    description: String,

    #[command(flatten)]
    storage: StorageConfig,
}

#[derive(Args)]
struct DoctorArgs {
    /// Recompute and compare every checksum
    #[arg(long)]
    verify: bool,

    #[command(flatten)]
    storage: StorageConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log_level {
        Some(level) => EnvFilter::new(level.as_directive()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve(config) => serve(config).await,
        Commands::Upload(args) => upload(&args),
        Commands::Doctor(args) => run_doctor(&args),
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    tracing::info!(
        "Configuration loaded: bind={}, firmware_dir={}",
        config.bind,
        config.storage.firmware_dir.display()
    );
    config.validate()?;

    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}

fn upload(args: &UploadArgs) -> Result<()> {
    args.storage.validate()?;
    let store = Arc::new(args.storage.open_store());
    store.ensure_layout()?;

    let ingestor = Ingestor::new(store, args.storage.checksum, args.storage.chunk_size);
    let committed = ingestor
        .ingest_file(&args.file, &args.version, &args.device_type, &args.description)
        .with_context(|| format!("Failed to publish {}", args.file.display()))?;

    let entry = &committed.entry;
    println!(
        "{} {} v{} as {} ({} bytes, checksum {})",
        if committed.replaced { "Replaced" } else { "Added" },
        entry.device_type,
        entry.version,
        entry.filename,
        entry.size,
        entry.checksum
    );
    println!("Catalog latest version: {}", committed.latest_version);
    Ok(())
}

fn run_doctor(args: &DoctorArgs) -> Result<()> {
    args.storage.validate()?;
    let store = args.storage.open_store();
    let verify = args.verify.then_some(Verify {
        algorithm: args.storage.checksum,
        chunk_size: args.storage.chunk_size,
    });

    let report = doctor::diagnose(&store, verify)?;

    println!("Firmware directory: {}", store.dir().display());
    if report.created {
        println!("Created empty catalog at {}", store.document_path().display());
    }
    match &report.document {
        DocumentHealth::Valid => println!(
            "Catalog: {} entries, latest version {}",
            report.entries, report.latest_version
        ),
        DocumentHealth::Corrupt(reason) => println!("Catalog: corrupt ({reason})"),
        DocumentHealth::Unreadable(reason) => println!("Catalog: unreadable ({reason})"),
    }
    for fault in &report.faults {
        println!("  fault: {fault}");
    }
    for stray in &report.stray_files {
        println!("  stray: {stray}");
    }

    if !report.is_healthy() {
        bail!(
            "Repository at {} is unhealthy: {} integrity fault(s)",
            store.dir().display(),
            report.faults.len()
        );
    }
    println!("No integrity faults found");
    Ok(())
}
