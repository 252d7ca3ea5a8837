// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the frame pipeline
//!
//! This module provides command-line functionality for:
//! - Recording the synthetic test pattern to MP4
//! - Streaming it to a TCP endpoint
//! - Driving sessions with JSON commands on stdin
//! - Previewing the watermark and listing encoders

use chrono::{Local, NaiveTime};
use labcam::backends::camera::{
    FrameAction, FrameData, FrameProcessor, FrameSource, LatestFrameSlot, TestPatternSource,
};
use labcam::config::Config;
use labcam::control::SessionController;
use labcam::media::encoders::backend::EncoderFactory;
use labcam::media::encoders::video::{encoder_catalogue, parse_codec_priority};
use labcam::media::watermark::{self, WatermarkRenderer};
use labcam::pipelines::stream::{StreamSession, TcpTransport};
use labcam::pipelines::video::{
    FrameOutcome, RecorderSessionFactory, VideoRecorder, WatermarkSettings,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Options shared by `record` and `stream`
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub duration: u64,
    pub fps: Option<u32>,
    pub bitrate_mbps: Option<f32>,
    pub width: u32,
    pub height: u32,
    pub codec: Option<String>,
}

/// Stand-in factory for builds without an encoder backend
#[cfg(not(feature = "gstreamer"))]
struct NoEncoderBackend;

#[cfg(not(feature = "gstreamer"))]
impl EncoderFactory for NoEncoderBackend {
    fn open(
        &self,
        codec: labcam::media::encoders::VideoCodec,
        _settings: &labcam::media::encoders::EncoderSettings,
    ) -> Result<Box<dyn labcam::media::encoders::HardwareEncoder>, String> {
        Err(format!(
            "{} unavailable: built without the gstreamer feature",
            codec
        ))
    }
}

/// Encoder backend compiled into this binary
fn encoder_backend() -> Box<dyn EncoderFactory> {
    #[cfg(feature = "gstreamer")]
    {
        Box::new(labcam::media::encoders::GstEncoderFactory)
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        Box::new(NoEncoderBackend)
    }
}

fn install_stop_flag() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;
    Ok(stop_flag)
}

/// Feed `source` into `slot` in real time until `stop` is set, the duration
/// has passed or the source runs dry
fn pump_frames(
    source: &mut TestPatternSource,
    slot: &LatestFrameSlot<FrameData>,
    stop: &AtomicBool,
    duration: Option<Duration>,
    show_progress: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let interval = Duration::from_micros(source.frame_interval_us().max(1) as u64);
    let start = Instant::now();

    while duration.is_none_or(|d| start.elapsed() < d) {
        if stop.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        let Some(frame) = source.next_frame() else {
            break;
        };
        slot.offer(frame);

        if show_progress {
            let elapsed = start.elapsed().as_secs();
            print!("\rRunning: {:02}:{:02}", elapsed / 60, elapsed % 60);
            std::io::Write::flush(&mut std::io::stdout())?;
        }
        std::thread::sleep(interval);
    }
    if show_progress {
        println!();
    }
    Ok(())
}

/// Record the test pattern to an MP4 file
pub fn record_video(
    options: CaptureOptions,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let mut settings = config.recorder_settings();
    if let Some(fps) = options.fps {
        settings.encoder.fps = fps;
    }
    if let Some(mbps) = options.bitrate_mbps {
        settings.encoder.bitrate_override_kbps = Some((mbps * 1000.0).round() as u32);
    }
    if let Some(codec) = options.codec.as_deref() {
        settings.encoder.codec_priority = parse_codec_priority(codec);
    }
    if options.duration > 0 {
        settings.max_duration = Some(Duration::from_secs(options.duration));
    }

    let fps = settings.encoder.effective_fps();
    let output_dir = output.unwrap_or_else(|| config.output_folder());
    println!("Recording format: {}x{} @ {}fps", options.width, options.height, fps);
    println!("Output folder: {}", output_dir.display());
    println!("Duration: {} seconds", options.duration);

    let recorder = Arc::new(Mutex::new(VideoRecorder::new(settings, encoder_backend())));
    let slot = Arc::new(LatestFrameSlot::new());
    let stop_flag = install_stop_flag()?;

    let mut processor = {
        let recorder = Arc::clone(&recorder);
        let stop_flag = Arc::clone(&stop_flag);
        FrameProcessor::spawn(
            "recorder",
            Arc::clone(&slot),
            move |frame: FrameData| {
                let mut recorder = recorder.lock().unwrap_or_else(|e| e.into_inner());
                match recorder.process_frame(&frame.view()) {
                    Ok(FrameOutcome::LimitReached) => {
                        stop_flag.store(true, Ordering::SeqCst);
                        FrameAction::Stop
                    }
                    Ok(_) => FrameAction::Continue,
                    Err(e) => {
                        eprintln!("Recording failed: {}", e);
                        stop_flag.store(true, Ordering::SeqCst);
                        FrameAction::Stop
                    }
                }
            },
        )
    };

    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    let mut source = TestPatternSource::new(options.width, options.height, fps);
    let limit = (options.duration > 0).then(|| Duration::from_secs(options.duration));
    pump_frames(&mut source, &slot, &stop_flag, limit, true)?;

    processor.finish();

    let output = recorder.lock().unwrap_or_else(|e| e.into_inner()).stop()?;
    let path = output.save(&output_dir)?;
    println!(
        "Video saved: {} ({} frames, {})",
        path.display(),
        output.metadata.frame_count,
        output.metadata.codec
    );
    Ok(())
}

/// Stream the test pattern to a TCP endpoint
pub fn stream_video(
    options: CaptureOptions,
    address: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let address = address.unwrap_or_else(|| config.stream_address.clone());
    let mut settings = config.stream_settings();
    if let Some(fps) = options.fps {
        settings.target_fps = fps;
        settings.encoder.fps = fps;
    }
    if let Some(mbps) = options.bitrate_mbps {
        settings.encoder.bitrate_override_kbps = Some((mbps * 1000.0).round() as u32);
    }
    if let Some(codec) = options.codec.as_deref() {
        settings.encoder.codec_priority = parse_codec_priority(codec);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let mut transport = runtime.block_on(TcpTransport::connect(&address))?;
    let writer = transport.take_writer();
    println!("Streaming to {}", address);

    let watermark = WatermarkRenderer::new();
    if let Some(wm) = settings.watermark {
        let _ = watermark.spawn_preload(wm.cell_width, wm.cell_height);
    }
    let source_fps = settings.encoder.effective_fps().max(settings.target_fps);
    let session = Arc::new(Mutex::new(StreamSession::new(
        settings,
        encoder_backend(),
        transport,
        watermark,
    )));
    let slot = Arc::new(LatestFrameSlot::new());
    let stop_flag = install_stop_flag()?;

    let mut processor = {
        let session = Arc::clone(&session);
        let stop_flag = Arc::clone(&stop_flag);
        FrameProcessor::spawn(
            "stream",
            Arc::clone(&slot),
            move |frame: FrameData| {
                let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                match session.process_frame(&frame.view()) {
                    Ok(true) => FrameAction::Continue,
                    Ok(false) => {
                        eprintln!("Stream connection closed");
                        stop_flag.store(true, Ordering::SeqCst);
                        FrameAction::Stop
                    }
                    Err(e) => {
                        eprintln!("Streaming failed: {}", e);
                        stop_flag.store(true, Ordering::SeqCst);
                        FrameAction::Stop
                    }
                }
            },
        )
    };

    println!("Streaming... (press Ctrl+C to stop)");
    let mut source = TestPatternSource::new(options.width, options.height, source_fps);
    let limit = (options.duration > 0).then(|| Duration::from_secs(options.duration));
    pump_frames(&mut source, &slot, &stop_flag, limit, true)?;

    processor.finish();

    let result = session.lock().unwrap_or_else(|e| e.into_inner()).stop();
    if let Some(writer) = writer
        && let Err(e) = runtime.block_on(writer)
    {
        warn!(error = %e, "Stream writer task failed");
    }

    let output = result?;
    println!(
        "Stream finished: {} sent, {} gated, {} failed",
        output.stream.sent, output.stream.gated, output.stream.send_failures
    );
    Ok(())
}

/// Drive recording sessions with JSON commands read from stdin
///
/// Status messages are printed to stdout, one JSON object per line.
pub fn run_control(width: u32, height: u32) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let output_dir = config.output_folder();
    let factory = RecorderSessionFactory::new(config.recorder_settings(), encoder_backend);

    let controller = SessionController::new(factory, config.default_capture_params())
        .on_status(|status| println!("{}", status.to_json()))
        .on_output(move |output| match output.save(&output_dir) {
            Ok(path) => info!(path = %path.display(), "Recording delivered"),
            Err(e) => warn!(error = %e, "Failed to save recording"),
        });
    let controller = Arc::new(Mutex::new(controller));
    controller
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .announce_ready();

    let slot = Arc::new(LatestFrameSlot::new());
    let stop_flag = install_stop_flag()?;

    let mut processor = {
        let controller = Arc::clone(&controller);
        FrameProcessor::spawn(
            "control",
            Arc::clone(&slot),
            move |frame: FrameData| {
                let mut controller = controller.lock().unwrap_or_else(|e| e.into_inner());
                controller.push_frame(&frame.view());
                FrameAction::Continue
            },
        )
    };

    {
        let controller = Arc::clone(&controller);
        let stop_flag = Arc::clone(&stop_flag);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let mut controller = controller.lock().unwrap_or_else(|e| e.into_inner());
                // Failures are already reported as status messages
                let _ = controller.handle_message(&line);
            }
            stop_flag.store(true, Ordering::SeqCst);
        });
    }

    let fps = config.encoder_config().effective_fps();
    let mut source = TestPatternSource::new(width, height, fps);
    pump_frames(&mut source, &slot, &stop_flag, None, false)?;

    processor.finish();

    let mut controller = controller.lock().unwrap_or_else(|e| e.into_inner());
    if controller.is_active() {
        let _ = controller.stop();
    }
    Ok(())
}

/// Render the watermark onto a grey frame and save the luma plane as PNG
pub fn watermark_preview(
    output: PathBuf,
    time: Option<String>,
    width: u32,
    height: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = match time.as_deref() {
        Some(time) => {
            let parsed = NaiveTime::parse_from_str(time, "%H:%M:%S")
                .map_err(|e| format!("Invalid time '{}': {}", time, e))?;
            watermark::timestamp_text(&parsed)
        }
        None => watermark::timestamp_text(&Local::now()),
    };

    let wm = WatermarkSettings::default();
    let renderer = WatermarkRenderer::new();
    renderer.preload(wm.cell_width, wm.cell_height);

    let mut luma = vec![128u8; width as usize * height as usize];
    let outcome = renderer.blit(
        &mut luma,
        width,
        height,
        &text,
        wm.cell_width,
        wm.cell_height,
        wm.origin_x,
        wm.origin_y,
    );

    let image = image::GrayImage::from_raw(width, height, luma)
        .ok_or("Frame buffer does not match the requested size")?;
    image.save(&output)?;
    println!("Watermark '{}' ({:?}) saved: {}", text, outcome, output.display());
    Ok(())
}

/// List the encoders in the catalogue and whether they can be used
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "gstreamer")]
    let available: Vec<&str> = labcam::media::encoders::detection::detect_video_encoders()
        .iter()
        .map(|info| info.element_name)
        .collect();
    #[cfg(not(feature = "gstreamer"))]
    let available: Vec<&str> = Vec::new();

    #[cfg(not(feature = "gstreamer"))]
    println!("Built without the gstreamer feature; no encoder can be opened.");

    println!("Video encoders:");
    println!();
    for info in encoder_catalogue() {
        let status = if available.contains(&info.element_name) {
            "available"
        } else {
            "missing"
        };
        println!(
            "  {:<14} {:<24} {:<6} {}",
            info.element_name,
            info.display_name,
            if info.is_hardware { "HW" } else { "SW" },
            status
        );
    }
    Ok(())
}
