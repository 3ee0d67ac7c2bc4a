//! tsport audio port driver (tsport-audio) - Main entry point
//!
//! Runs an `AudioPort` against a synthetic transport stream held in a
//! `MemoryDemux`: connects it to an in-process allocator, starts the delivery
//! thread, logs every delivered buffer, and prints every port event as a
//! JSON line. Optionally seeks before starting and simulates a channel
//! change part way through.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tsport_audio::allocator::MemoryAllocator;
use tsport_audio::config::PortConfig;
use tsport_audio::connection::PeerInfo;
use tsport_audio::media::{AudioFormat, MediaType};
use tsport_audio::upstream::{synthetic_units, MemoryDemux};
use tsport_audio::worker::{ChannelSink, SinkMessage};
use tsport_audio::{AudioPort, DeliveryWorker, FilterContext, FilterHandle, SharedSection};
use tsport_common::config::ConfigResolver;
use tsport_common::events::PortEvent;
use tsport_common::timing::{format_reftime, frames_to_reftime, ms_to_reftime, pts_to_reftime, RefTime};

/// Samples per AC-3 frame
const AC3_FRAME_SAMPLES: u64 = 1536;

const SAMPLE_RATE: u32 = 48_000;

/// 90 kHz PTS of the first unit on the channel tuned by a simulated zap
const ZAP_FIRST_PTS: u64 = 324_000_000;

/// Command-line arguments for tsport-audio
#[derive(Parser, Debug)]
#[command(name = "tsport-audio")]
#[command(about = "Transport-stream audio delivery port driver")]
#[command(version)]
struct Args {
    /// Config file (overrides TSPORT_CONFIG and the per-user config file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of access units in the synthetic stream
    #[arg(short, long, default_value = "250")]
    units: usize,

    /// Duration of one access unit in milliseconds (default: one AC-3 frame)
    #[arg(long)]
    frame_ms: Option<i64>,

    /// Simulate a channel change after this many delivered buffers
    #[arg(long)]
    zap_at: Option<usize>,

    /// Enable slow motion on zap (overrides config)
    #[arg(long, conflicts_with = "no_slow_motion")]
    slow_motion: bool,

    /// Disable slow motion on zap (overrides config)
    #[arg(long)]
    no_slow_motion: bool,

    /// Seek to this position (milliseconds) before starting
    #[arg(long)]
    seek_ms: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = ConfigResolver::new("tsport").resolve(args.config.as_deref());
    let config = PortConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config)?;

    info!(
        "Starting tsport audio port driver (tsport-audio) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    let mut settings = config.audio.clone();
    if args.slow_motion {
        settings.slow_motion_on_zap = true;
    }
    if args.no_slow_motion {
        settings.slow_motion_on_zap = false;
    }

    let frame = match args.frame_ms {
        Some(ms) => ms_to_reftime(ms.max(1)),
        None => frames_to_reftime(AC3_FRAME_SAMPLES, SAMPLE_RATE),
    };
    let zap_at = args.zap_at.filter(|&at| {
        let usable = at > 0 && at < args.units;
        if !usable {
            warn!("Ignoring --zap-at {}: stream has {} units", at, args.units);
        }
        usable
    });

    let demux = Arc::new(MemoryDemux::new(Some(MediaType::new(
        AudioFormat::Ac3,
        SAMPLE_RATE,
        2,
    ))));
    demux.extend(synthetic_units(args.units, 0, frame, 768));
    if zap_at.is_none() {
        demux.finish();
    }

    let filter: Arc<dyn FilterContext> = Arc::new(FilterHandle::new("tsport-demux"));
    let section = SharedSection::new();
    let port = Arc::new(AudioPort::new(
        Arc::downgrade(&filter),
        section,
        demux.clone(),
        settings.clone(),
    ));
    let mut events = port.events().subscribe();

    let peer = PeerInfo::new("tsport-renderer");
    port.check_connect(&peer).context("Connection refused")?;
    let allocator = Arc::new(MemoryAllocator::new(
        settings.default_buffer_count,
        settings.max_frame_size,
    ));
    port.complete_connect(&peer, allocator)
        .context("Buffer negotiation failed")?;

    if let Some(seek_ms) = args.seek_ms {
        port.set_start(ms_to_reftime(seek_ms))
            .context("Seek failed")?;
    }

    let (sink, mut delivered) = ChannelSink::new();
    let worker = DeliveryWorker::spawn(Arc::clone(&port), Box::new(sink))
        .context("Failed to start delivery thread")?;

    let mut count = 0usize;
    loop {
        tokio::select! {
            message = delivered.recv() => match message {
                Some(SinkMessage::Buffer(buffer)) => {
                    count += 1;
                    info!(
                        "#{:<5} start={} stop={} len={}{}{}",
                        count,
                        buffer.start.map(format_reftime).unwrap_or_else(|| "-".to_string()),
                        buffer.stop.map(format_reftime).unwrap_or_else(|| "-".to_string()),
                        buffer.len,
                        if buffer.flags.discontinuity { " DISCONTINUITY" } else { "" },
                        if buffer.flags.slow_motion { " SLOW-MOTION" } else { "" },
                    );
                    if zap_at == Some(count) {
                        zap(&demux, &port, args.units - count, frame);
                    }
                }
                Some(SinkMessage::EndOfStream) | None => break,
            },
            event = events.recv() => match event {
                Ok(event) => print_event(&event)?,
                Err(RecvError::Lagged(skipped)) => warn!("Event stream lagged, {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    let exit = tokio::task::spawn_blocking(move || worker.stop())
        .await
        .context("Delivery thread join failed")?;
    info!("Delivery finished: {}", exit);

    if port.is_connected() {
        port.break_connect().context("Disconnect failed")?;
    }
    while let Ok(event) = events.try_recv() {
        print_event(&event)?;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Replace the rest of the stream with a new channel and signal the change
fn zap(demux: &MemoryDemux, port: &AudioPort, remaining: usize, frame: RefTime) {
    let first_pts = pts_to_reftime(ZAP_FIRST_PTS);
    info!("Zapping to new channel at {}", format_reftime(first_pts));
    port.set_discontinuity(true);
    demux.retune(synthetic_units(remaining, first_pts, frame, 768), true);
    demux.finish();
}

fn print_event(event: &PortEvent) -> Result<()> {
    let json = serde_json::to_string(event).context("Failed to serialize event")?;
    println!("{}", json);
    Ok(())
}

/// Install the tracing subscriber: RUST_LOG wins over the configured level
fn init_tracing(config: &PortConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
