//! GFAST - Geodetic First Approximation of Size and Timing
//!
//! Real-time GPS displacement processing for earthquake early warning.
//!
//! # Usage
//!
//! ```bash
//! # Replay a recorded scenario (see gfast-synthetic)
//! gfast --metadata sites.txt --traces scenario.tb --alerts alerts.jsonl --publish-dir out/
//!
//! # Live tracebuf export
//! gfast --metadata sites.txt --mask mask.txt --tcp 10.0.0.5:16005 --alerts alerts.jsonl
//! ```
//!
//! # Environment Variables
//!
//! - `GFAST_CONFIG`: Path to the TOML configuration (default: ./gfast.toml)
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gfast::acquisition::ReconnectPolicy;
use gfast::pipeline::{
    AlertTransport, Clock, JsonLinesTransport, ReplayClock, ReplaySource, Scheduler, SystemClock,
    TcpTraceSource, TraceSource,
};
use gfast::storage::{ArchiveSink, InMemoryArchive, SledArchive};
use gfast::{sites, GfastConfig};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "gfast")]
#[command(about = "Geodetic earthquake early warning: PGD, CMT and finite-fault inversions")]
#[command(version)]
struct CliArgs {
    /// TOML configuration (overrides the ./gfast.toml search)
    #[arg(long, env = "GFAST_CONFIG")]
    config: Option<PathBuf>,

    /// Site metadata file (one channel per line)
    #[arg(long)]
    metadata: PathBuf,

    /// Site mask file excluding sites from individual inversions
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Replay a file of concatenated tracebuf messages
    #[arg(long, conflicts_with = "tcp", required_unless_present = "tcp")]
    traces: Option<PathBuf>,

    /// Connect to a tracebuf TCP export
    #[arg(long, value_name = "HOST:PORT")]
    tcp: Option<String>,

    /// JSON-lines alert file (one alert or {"cancel": id} per line)
    #[arg(long)]
    alerts: PathBuf,

    /// Archive directory (overrides [archive] path)
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Keep results in memory instead of the sled archive
    #[arg(long)]
    no_archive: bool,

    /// Write published event messages into this directory
    #[arg(long)]
    publish_dir: Option<PathBuf>,

    /// Replay clock start (epoch seconds); defaults to the first sample
    #[arg(long, requires = "traces")]
    replay_start: Option<f64>,

    /// Replay speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(args: &CliArgs) -> Result<GfastConfig> {
    let mut config = match &args.config {
        Some(path) => GfastConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GfastConfig::load(),
    };
    if let Some(path) = &args.archive {
        config.archive.path = path.clone();
    }
    if args.no_archive {
        config.archive.enabled = false;
    }
    Ok(config)
}

fn open_archive(config: &GfastConfig) -> Result<Arc<dyn ArchiveSink>> {
    if !config.archive.enabled {
        info!("Archive disabled, results kept in memory");
        return Ok(Arc::new(InMemoryArchive::new()));
    }
    let archive = SledArchive::open(&config.archive.path)
        .with_context(|| format!("Failed to open archive {}", config.archive.path.display()))?;
    Ok(Arc::new(archive))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json_logs);

    let config = load_config(&args)?;

    let mut metadata = sites::load_metadata(&args.metadata, config.general.default_dt)
        .with_context(|| format!("Failed to load site metadata {}", args.metadata.display()))?;
    if let Some(mask) = &args.mask {
        sites::load_mask(mask, &mut metadata)
            .with_context(|| format!("Failed to load site mask {}", mask.display()))?;
    }

    let (source, clock): (Box<dyn TraceSource>, Arc<dyn Clock>) = match (&args.traces, &args.tcp) {
        (Some(path), _) => {
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read traces {}", path.display()))?;
            let start = args
                .replay_start
                .or_else(|| ReplaySource::first_sample_time(&bytes))
                .context("Trace file holds no readable messages")?;
            info!(start = start, speed = args.speed, "Replay clock");
            let clock: Arc<dyn Clock> = Arc::new(ReplayClock::new(start, args.speed));
            let source: Box<dyn TraceSource> =
                Box::new(ReplaySource::new(&bytes, Arc::clone(&clock), config.general.max_batch));
            (source, clock)
        }
        (None, Some(address)) => {
            let policy = ReconnectPolicy::from(&config.transport);
            let source: Box<dyn TraceSource> = Box::new(
                TcpTraceSource::connect(address, policy)
                    .await
                    .with_context(|| format!("Failed to connect to {address}"))?,
            );
            (source, Arc::new(SystemClock) as Arc<dyn Clock>)
        }
        (None, None) => anyhow::bail!("Either --traces or --tcp is required"),
    };

    let transport: Box<dyn AlertTransport> = Box::new(
        JsonLinesTransport::open(&args.alerts, Arc::clone(&clock), args.publish_dir.clone())
            .with_context(|| format!("Failed to load alerts {}", args.alerts.display()))?,
    );
    let archive = open_archive(&config)?;

    info!(
        sites = metadata.len(),
        bufflen_s = config.general.bufflen,
        wait_time_s = config.general.wait_time,
        "GFAST starting"
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let scheduler = Scheduler::new(Arc::new(config), metadata, source, transport, archive, clock);
    let stats = scheduler.run_forever(cancel_token).await.context("Scheduler failed")?;

    info!(
        iterations = stats.iterations,
        decoded = stats.messages_decoded,
        dropped = stats.messages_dropped,
        inversions = stats.inversions_run,
        withheld = stats.inversions_withheld,
        published = stats.messages_published,
        "GFAST shutdown complete"
    );
    Ok(())
}
