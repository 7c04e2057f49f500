//! framecast-send — entry point.
//!
//! Publishes an animated BGRA test pattern into a named slot at a fixed
//! rate, and listens for control messages that steer the pattern:
//!
//! ```text
//! /pattern/speed <f>      Animation speed multiplier
//! /pattern/freeze <i>     1 = hold the current frame, 0 = resume
//! /pattern/size <i> <i>   Resize the slot to width x height
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecast_core::{ControlArg, Frame, Framecast, FramecastConfig, PixelFormat};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-send", about = "Publish a test pattern into a framecast slot")]
struct Cli {
    /// Slot name to publish.
    #[arg(short, long, default_value = "cam1")]
    slot: String,

    /// Initial frame width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Initial frame height in pixels.
    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Frames per second.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// UDP bind address for the control channel.
    #[arg(long, default_value = "0.0.0.0:9000")]
    control: SocketAddr,

    /// Slot namespace directory (defaults to the machine-wide one).
    #[arg(long)]
    namespace: Option<PathBuf>,
}

// ── Pattern state, shared with control handlers ──────────────────

struct PatternState {
    /// f32 bits; speed multiplier for the animation phase.
    speed: AtomicU32,
    frozen: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
}

/// Diagonal colour-wave test pattern, BGRA.
fn render(width: u32, height: u32, phase: f32, out: &mut Vec<u8>) {
    out.clear();
    out.reserve((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let t = (x + y) as f32 * 0.05 + phase;
            out.push((t.sin() * 127.0 + 128.0) as u8); // B
            out.push(((t + 2.1).sin() * 127.0 + 128.0) as u8); // G
            out.push(((t + 4.2).sin() * 127.0 + 128.0) as u8); // R
            out.push(0xFF); // A
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-send v{}", env!("CARGO_PKG_VERSION"));
    info!("slot: {} ({}x{} @ {} fps)", cli.slot, cli.width, cli.height, cli.fps);

    let mut config = FramecastConfig::default();
    if let Some(namespace) = cli.namespace.clone() {
        config.namespace = namespace;
    }
    let mut fc = Framecast::with_config(config)?;

    let state = Arc::new(PatternState {
        speed: AtomicU32::new(1.0f32.to_bits()),
        frozen: AtomicBool::new(false),
        width: AtomicU32::new(cli.width),
        height: AtomicU32::new(cli.height),
    });

    {
        let state = Arc::clone(&state);
        fc.on_control("/pattern/speed", move |msg| {
            if let Some(speed) = msg.args().first().and_then(ControlArg::as_float) {
                state.speed.store(speed.to_bits(), Ordering::Relaxed);
                info!(speed, "pattern speed set");
            }
        })?;
    }
    {
        let state = Arc::clone(&state);
        fc.on_control("/pattern/freeze", move |msg| {
            if let Some(flag) = msg.args().first().and_then(ControlArg::as_int) {
                state.frozen.store(flag != 0, Ordering::Relaxed);
                info!(frozen = flag != 0, "pattern freeze set");
            }
        })?;
    }
    {
        let state = Arc::clone(&state);
        fc.on_control("/pattern/size", move |msg| {
            let mut args = msg.args().iter().filter_map(ControlArg::as_int);
            if let (Some(w), Some(h)) = (args.next(), args.next())
                && w > 0
                && h > 0
            {
                state.width.store(w as u32, Ordering::Relaxed);
                state.height.store(h as u32, Ordering::Relaxed);
                info!(width = w, height = h, "pattern size set");
            }
        })?;
    }

    let control_addr = fc.start_control_listener(cli.control).await?;
    info!("control channel listening on {control_addr}");

    // Ctrl-C handler.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
            stop.store(true, Ordering::SeqCst);
        });
    }

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / cli.fps.max(1) as f64));
    let mut phase = 0.0f32;
    let mut pixels = Vec::new();

    while !stop.load(Ordering::SeqCst) {
        ticker.tick().await;

        if !state.frozen.load(Ordering::Relaxed) {
            phase += 0.1 * f32::from_bits(state.speed.load(Ordering::Relaxed));
        }
        let width = state.width.load(Ordering::Relaxed);
        let height = state.height.load(Ordering::Relaxed);
        render(width, height, phase, &mut pixels);

        let frame = Frame::new(width, height, PixelFormat::Bgra8, &pixels)?;
        if let Err(e) = fc.publish_frame(&cli.slot, &frame) {
            warn!("publish failed: {e}");
        }
    }

    let published = fc.publisher().frames_published();
    let dispatched = fc.control_stats().messages_dispatched();
    fc.shutdown().await?;
    info!(published, dispatched, "done");
    Ok(())
}
