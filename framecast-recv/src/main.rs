//! framecast-recv — entry point.
//!
//! Attaches to a named slot and drains frames, printing throughput stats.
//! Survives the full producer lifecycle: waits for the slot to appear,
//! re-maps after resizes, and falls back to waiting when the producer
//! goes away.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecast_core::slot::shm_unix::{ShmBackend, default_namespace_dir};
use framecast_core::{FramecastError, Subscriber, Subscription};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-recv", about = "Consume frames from a framecast slot")]
struct Cli {
    /// Slot name to attach to.
    #[arg(short, long, default_value = "cam1")]
    slot: String,

    /// Slot namespace directory (defaults to the machine-wide one).
    #[arg(long)]
    namespace: Option<PathBuf>,

    /// Seconds between stats lines.
    #[arg(long, default_value_t = 2)]
    stats_interval: u64,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-recv v{}", env!("CARGO_PKG_VERSION"));

    let namespace = cli.namespace.clone().unwrap_or_else(default_namespace_dir);
    let backend = Arc::new(ShmBackend::new(namespace)?);
    let subscriber = Subscriber::new(backend);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
            stop.store(true, Ordering::SeqCst);
        });
    }

    while !stop.load(Ordering::SeqCst) {
        let subscription = match subscriber.attach(&cli.slot) {
            Ok(sub) => {
                info!(slot = %cli.slot, "attached");
                sub
            }
            Err(FramecastError::NotFound(_)) => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        drain(subscription, &stop, Duration::from_secs(cli.stats_interval)).await;
        // Dropped out of the poll loop: producer is gone, go back to waiting.
    }
    Ok(())
}

/// Poll the subscription until the producer disappears or we are stopped.
async fn drain(mut sub: Subscription, stop: &AtomicBool, stats_interval: Duration) {
    let mut frames = 0u64;
    let mut window_start = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        match sub.poll() {
            Ok(Some(frame)) => {
                frames += 1;
                if window_start.elapsed() >= stats_interval {
                    let fps = frames as f64 / window_start.elapsed().as_secs_f64();
                    info!(
                        "{}x{} {:?} gen={} {:.1} fps (dropped {})",
                        frame.width,
                        frame.height,
                        frame.format,
                        frame.generation,
                        fps,
                        sub.dropped_frames(),
                    );
                    frames = 0;
                    window_start = Instant::now();
                }
            }
            Ok(None) => {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Err(FramecastError::SlotInvalidated { .. }) => {
                if let Err(e) = sub.remap() {
                    warn!("remap after resize failed: {e}");
                    return;
                }
                info!("slot resized, re-mapped");
            }
            Err(FramecastError::NotFound(_)) => {
                warn!(slot = sub.name(), "producer gone");
                return;
            }
            Err(e) => {
                warn!("poll failed: {e}");
                return;
            }
        }
    }
}
