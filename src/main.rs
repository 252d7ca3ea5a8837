// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "labcam")]
#[command(about = "Timestamped H.264/H.265 recording and streaming for lab cameras")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the synthetic test pattern to MP4
    Record {
        /// Recording duration in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output folder (default: ~/Videos/labcam)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Frame rate (default from config)
        #[arg(short, long)]
        fps: Option<u32>,

        /// Bitrate in Mbps (default from the bitrate preset)
        #[arg(short, long)]
        bitrate: Option<f32>,

        /// Source frame width
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Source frame height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Codec priority, e.g. "h264" or "h265,h264"
        #[arg(short, long)]
        codec: Option<String>,
    },

    /// Stream the synthetic test pattern to a TCP endpoint
    Stream {
        /// Endpoint address (default from config)
        #[arg(short, long)]
        address: Option<String>,

        /// Streaming duration in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Frames per second sent (0 = unlimited)
        #[arg(short, long)]
        fps: Option<u32>,

        /// Bitrate in Mbps
        #[arg(short, long)]
        bitrate: Option<f32>,

        #[arg(long, default_value = "1280")]
        width: u32,

        #[arg(long, default_value = "720")]
        height: u32,

        /// Codec priority, e.g. "h264" or "h265,h264"
        #[arg(short, long)]
        codec: Option<String>,
    },

    /// Read JSON control commands from stdin and print status messages
    Control {
        #[arg(long, default_value = "1280")]
        width: u32,

        #[arg(long, default_value = "720")]
        height: u32,
    },

    /// Render the watermark onto a grey frame and save it as PNG
    WatermarkPreview {
        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,

        /// Time to render as HH:MM:SS (default: now)
        #[arg(short, long)]
        time: Option<String>,

        #[arg(long, default_value = "320")]
        width: u32,

        #[arg(long, default_value = "120")]
        height: u32,
    },

    /// List known video encoders and whether they are available
    Encoders,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=labcam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            duration,
            output,
            fps,
            bitrate,
            width,
            height,
            codec,
        } => cli::record_video(
            cli::CaptureOptions {
                duration,
                fps,
                bitrate_mbps: bitrate,
                width,
                height,
                codec,
            },
            output,
        ),
        Commands::Stream {
            address,
            duration,
            fps,
            bitrate,
            width,
            height,
            codec,
        } => cli::stream_video(
            cli::CaptureOptions {
                duration,
                fps,
                bitrate_mbps: bitrate,
                width,
                height,
                codec,
            },
            address,
        ),
        Commands::Control { width, height } => cli::run_control(width, height),
        Commands::WatermarkPreview {
            output,
            time,
            width,
            height,
        } => cli::watermark_preview(output, time, width, height),
        Commands::Encoders => cli::list_encoders(),
    }
}
