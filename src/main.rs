//! vidloop: decode a video in an endless loop and present the latest frame at a fixed refresh rate.
//!
//! Video is optional: when the pipeline cannot be initialized the render loop
//! still runs and draws the overlay alone.

use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use crossbeam::channel;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vidloop::core::PlayerConfig;
use vidloop::decode::ffmpeg::FfmpegBackend;
use vidloop::decode::PixelFormat;
use vidloop::playback::LoopDecoder;
use vidloop::render::{HeadlessRenderer, RenderLoop};
use vidloop::source::{FixedResolver, NewestFileResolver, SourceResolver};

/// Loop a video file and present the newest decoded frame every refresh
#[derive(Parser, Debug)]
#[command(name = "vidloop")]
#[command(version)]
struct Args {
    /// Directory searched for the newest matching file
    #[arg(long, default_value = "/sdcard/Download")]
    dir: PathBuf,

    /// File extension to look for in --dir
    #[arg(long, default_value = "mp4")]
    ext: String,

    /// Play this file instead of searching --dir
    #[arg(long)]
    file: Option<PathBuf>,

    /// Number of decoded frames that may be outstanding at once
    #[arg(long, default_value = "3")]
    capacity: usize,

    /// Bounded wait for decoder input/output slots, in milliseconds
    #[arg(long, default_value = "10")]
    timeout_ms: u64,

    /// Refresh rate of the render loop
    #[arg(long, default_value = "60")]
    fps: f64,

    /// Output pixel format (rgba or yuv420)
    #[arg(long, default_value = "rgba")]
    format: String,

    /// Stop after this many seconds (runs until killed if omitted)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Log a status line every N refreshes
    #[arg(long, default_value = "60")]
    log_every: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let pixel_format = match args.format.to_lowercase().as_str() {
        "rgba" => PixelFormat::Rgba8,
        "yuv420" => PixelFormat::Yuv420,
        other => anyhow::bail!("Unknown pixel format: {}", other),
    };
    let config = PlayerConfig {
        capacity: args.capacity,
        dequeue_timeout: Duration::from_millis(args.timeout_ms),
        pixel_format,
        ..PlayerConfig::default()
    }
    .with_refresh_rate(args.fps);
    config.validate()?;

    let resolver: Box<dyn SourceResolver> = match args.file {
        Some(path) => Box::new(FixedResolver::new(path)),
        None => Box::new(NewestFileResolver::new(args.dir, &args.ext)),
    };
    let backend = FfmpegBackend::new()
        .map_err(|e| anyhow::anyhow!("Failed to initialize FFmpeg: {}", e))?;
    info!("FFmpeg initialized");

    let mut player = LoopDecoder::new(config.clone());
    if let Err(err) = player.init(resolver.as_ref(), &backend) {
        warn!("Video disabled: {}", err);
    }

    let stop = match args.duration_secs {
        Some(secs) => channel::after(Duration::from_secs(secs)),
        None => channel::never(),
    };
    let mut render_loop = RenderLoop::new(
        HeadlessRenderer::new(args.log_every),
        player.consumer(),
        config.frame_interval,
    );
    let result = render_loop.run(&stop);

    if let Some(pool) = player.pool_stats() {
        info!(
            "Pool: {} frames produced, {} superseded, {} outstanding",
            pool.produced, pool.dropped, pool.outstanding
        );
    }
    player.terminate();
    let stats = player.stats();
    info!(
        "Pump: {} samples, {} frames, {} loops, {} format changes",
        stats.samples_submitted, stats.frames_rendered, stats.loops, stats.format_changes
    );

    match result {
        Ok(summary) => {
            info!("Rendered {} refreshes, {} with video", summary.ticks, summary.frames_drawn);
            Ok(())
        }
        Err(e) => {
            error!("Render error: {}", e);
            Err(e.into())
        }
    }
}
