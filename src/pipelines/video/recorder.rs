// SPDX-License-Identifier: MPL-2.0

//! Video recording session
//!
//! Per frame: crop/rotate/repack with the [`ColorConverter`], burn the
//! timestamp watermark into luma, submit to the [`EncoderDriver`] which
//! drains into the MP4 [`ContainerMuxer`]. The encoder session opens lazily
//! on the first frame, once the rotated frame geometry is known.

use super::driver::{EncoderDriver, EncoderStats, SubmitOutcome};
use super::encoder_selection::EncoderConfig;
use super::muxer::ContainerMuxer;
use crate::backends::camera::types::{CapturedFrame, CropRect, SensorRotation};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::constants::watermark::{DEFAULT_CELL_HEIGHT, DEFAULT_CELL_WIDTH, DEFAULT_ORIGIN};
use crate::control::{CaptureParams, CaptureSession, SessionFactory, Size};
use crate::errors::{AppError, RecordingError};
use crate::media::encoders::backend::EncoderFactory;
use crate::media::encoders::video::VideoCodec;
use crate::media::nv12_converter::ColorConverter;
use crate::media::watermark::{self, WatermarkRenderer};
use crate::pipelines::stream::crop::aspect_crop;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Clamp a requested frame size to `limit`
///
/// If either dimension exceeds the limit the frame is cropped to a centered
/// square of side `min(width, height, limit)`. A limit of zero disables the
/// check.
pub fn apply_resolution_limit(width: u32, height: u32, limit: u32) -> (u32, u32) {
    if limit == 0 || (width <= limit && height <= limit) {
        return (width, height);
    }
    let side = width.min(height).min(limit);
    (side, side)
}

/// Where and how large the watermark is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkSettings {
    pub cell_width: u32,
    pub cell_height: u32,
    pub origin_x: u32,
    pub origin_y: u32,
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            cell_width: DEFAULT_CELL_WIDTH,
            cell_height: DEFAULT_CELL_HEIGHT,
            origin_x: DEFAULT_ORIGIN.0,
            origin_y: DEFAULT_ORIGIN.1,
        }
    }
}

/// Recording session parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    pub encoder: EncoderConfig,
    /// Requested output size in upright orientation; `None` uses the frame
    pub size: Option<(u32, u32)>,
    /// Centered crop shape used when no size is requested
    pub aspect_ratio: Option<Size>,
    pub rotation: SensorRotation,
    /// Longest allowed edge, zero for no limit
    pub resolution_limit: u32,
    /// `None` disables the watermark
    pub watermark: Option<WatermarkSettings>,
    /// Stop accepting frames after this much recorded time
    pub max_duration: Option<Duration>,
    pub strict_geometry: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            size: None,
            aspect_ratio: None,
            rotation: SensorRotation::None,
            resolution_limit: 0,
            watermark: Some(WatermarkSettings::default()),
            max_duration: None,
            strict_geometry: false,
        }
    }
}

/// What happened to one captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Frame reached the encoder
    Encoded,
    /// Frame was dropped by the encoder (no slot, capacity, queue failure)
    Dropped(SubmitOutcome),
    /// Strict geometry check rejected the frame
    Rejected,
    /// Maximum duration reached; the caller should stop the recorder
    LimitReached,
}

/// Recording metadata written next to the video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingMetadata {
    pub session_id: Uuid,
    pub started_at: DateTime<Local>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: VideoCodec,
    pub fallback_used: bool,
    pub frame_count: u64,
    pub degraded_frames: u64,
    pub stats: EncoderStats,
}

/// Finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOutput {
    pub bytes: Vec<u8>,
    pub metadata: RecordingMetadata,
}

impl RecordingOutput {
    /// File name for a recording started at `time`: `video_YYYYmmdd_HHMMSS.mp4`
    pub fn file_name(time: &DateTime<Local>) -> String {
        format!("video_{}.mp4", time.format("%Y%m%d_%H%M%S"))
    }

    /// Write the video and a JSON metadata sidecar into `dir`
    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(&self.metadata.started_at));
        std::fs::write(&path, &self.bytes)?;

        let sidecar = path.with_extension("json");
        let json = serde_json::to_vec_pretty(&self.metadata)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(&sidecar, json)?;

        info!(path = %path.display(), bytes = self.bytes.len(), "Recording saved");
        Ok(path)
    }
}

/// One recording session from first frame to finalized MP4
pub struct VideoRecorder {
    settings: RecorderSettings,
    converter: ColorConverter,
    watermark: WatermarkRenderer,
    driver: EncoderDriver<ContainerMuxer>,
    session_id: Uuid,
    started_at: Option<DateTime<Local>>,
    crop: Option<CropRect>,
    first_timestamp_us: Option<i64>,
    frames_seen: u64,
    limit_reached: bool,
}

impl VideoRecorder {
    /// Create a recorder; the glyph preload starts immediately in the background
    pub fn new(settings: RecorderSettings, factory: Box<dyn EncoderFactory>) -> Self {
        let watermark = WatermarkRenderer::new();
        if let Some(wm) = settings.watermark {
            // Detached: blits are no-ops until the cache is published
            let _ = watermark.spawn_preload(wm.cell_width, wm.cell_height);
        }
        Self::with_watermark(settings, factory, watermark)
    }

    /// Create a recorder sharing an existing watermark renderer
    pub fn with_watermark(
        settings: RecorderSettings,
        factory: Box<dyn EncoderFactory>,
        watermark: WatermarkRenderer,
    ) -> Self {
        let converter = ColorConverter::new(settings.encoder.layout)
            .with_strict_geometry(settings.strict_geometry);
        Self {
            settings,
            converter,
            watermark,
            driver: EncoderDriver::new(factory),
            session_id: Uuid::new_v4(),
            started_at: None,
            crop: None,
            first_timestamp_us: None,
            frames_seen: 0,
            limit_reached: false,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_recording(&self) -> bool {
        self.driver.is_running()
    }

    pub fn limit_reached(&self) -> bool {
        self.limit_reached
    }

    pub fn stats(&self) -> EncoderStats {
        self.driver.stats()
    }

    /// Output size of the running session
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.crop.map(|c| (c.width().max(0) as u32, c.height().max(0) as u32))
    }

    /// Session crop in upright coordinates for a frame of the given geometry
    fn session_crop(&self, frame: &CapturedFrame<'_>) -> CropRect {
        let (rotated_w, rotated_h) = frame.rotated_size(self.settings.rotation);
        let full = CropRect::full(rotated_w, rotated_h);
        let (want_w, want_h) = match (self.settings.size, self.settings.aspect_ratio) {
            (Some(size), _) => size,
            (None, Some(aspect)) => {
                let rect = aspect_crop(rotated_w, rotated_h, aspect, 2);
                (rect.width() as u32, rect.height() as u32)
            }
            (None, None) => (rotated_w, rotated_h),
        };
        let (want_w, want_h) =
            apply_resolution_limit(want_w, want_h, self.settings.resolution_limit);
        full.centered_within(want_w, want_h).normalized(rotated_w, rotated_h)
    }

    fn ensure_started(&mut self, frame: &CapturedFrame<'_>) -> Result<CropRect, RecordingError> {
        if let Some(crop) = self.crop
            && self.driver.is_running()
        {
            return Ok(crop);
        }

        let crop = self.session_crop(frame);
        let (width, height) = (crop.width() as u32, crop.height() as u32);
        let frame_interval_us = self.settings.encoder.settings(width, height).frame_interval_us();
        let sink = ContainerMuxer::new(frame_interval_us);
        self.driver.start(&self.settings.encoder, width, height, sink)?;

        self.crop = Some(crop);
        self.started_at = Some(Local::now());
        self.first_timestamp_us = Some(frame.timestamp_us);
        info!(
            session = %self.session_id,
            width,
            height,
            crop = %crop,
            rotation = %self.settings.rotation,
            "Recording started"
        );
        Ok(crop)
    }

    /// Process one captured frame
    ///
    /// Only a failed encoder start is reported as an error; every per-frame
    /// fault degrades to a dropped frame.
    pub fn process_frame(
        &mut self,
        frame: &CapturedFrame<'_>,
    ) -> Result<FrameOutcome, RecordingError> {
        if self.limit_reached {
            return Ok(FrameOutcome::LimitReached);
        }

        let crop = self.ensure_started(frame)?;

        if let (Some(max), Some(first)) = (self.settings.max_duration, self.first_timestamp_us) {
            let elapsed_us = frame.timestamp_us.saturating_sub(first).max(0) as u128;
            if elapsed_us >= max.as_micros() {
                info!(
                    session = %self.session_id,
                    max_secs = max.as_secs(),
                    "Maximum recording duration reached"
                );
                self.limit_reached = true;
                return Ok(FrameOutcome::LimitReached);
            }
        }

        let mut buffer = match self.converter.convert(frame, crop, self.settings.rotation) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(error = %e, "Frame rejected");
                return Ok(FrameOutcome::Rejected);
            }
        };

        if let Some(wm) = self.settings.watermark {
            let text = watermark::current_timestamp_text();
            let (width, height) = (buffer.width, buffer.height);
            self.watermark.blit(
                buffer.luma_mut(),
                width,
                height,
                &text,
                wm.cell_width,
                wm.cell_height,
                wm.origin_x,
                wm.origin_y,
            );
        }

        let report = self.driver.submit(&buffer);
        self.frames_seen += 1;
        if self.frames_seen % FRAME_LOG_INTERVAL == 0 {
            let stats = self.driver.stats();
            debug!(
                frames = self.frames_seen,
                written = stats.written,
                dropped_no_slot = stats.dropped_no_slot,
                "Recording progress"
            );
        }

        Ok(match report.outcome {
            SubmitOutcome::Queued => FrameOutcome::Encoded,
            other => FrameOutcome::Dropped(other),
        })
    }

    /// Stop and finalize
    ///
    /// Fails with `NoSamples` if no frame was encoded or the container ended
    /// up empty. The recorder can be reused for a new session afterwards.
    pub fn stop(&mut self) -> Result<RecordingOutput, RecordingError> {
        // No encoder was ever opened: nothing reached the container
        let result = if self.driver.is_running() {
            self.driver.stop()
        } else {
            Err(RecordingError::NoSamples)
        };
        let started_at = self.started_at.take().unwrap_or_else(Local::now);
        let session_id = self.session_id;

        self.crop = None;
        self.first_timestamp_us = None;
        self.frames_seen = 0;
        self.limit_reached = false;
        self.session_id = Uuid::new_v4();

        let encoded = result?;
        if encoded.output.is_empty() {
            return Err(RecordingError::NoSamples);
        }

        let summary = encoded.summary;
        Ok(RecordingOutput {
            bytes: encoded.output,
            metadata: RecordingMetadata {
                session_id,
                started_at,
                width: summary.width,
                height: summary.height,
                fps: summary.fps,
                codec: summary.codec,
                fallback_used: summary.fallback_used,
                frame_count: summary.frame_count,
                degraded_frames: self.converter.degraded_frames(),
                stats: summary.stats,
            },
        })
    }
}

impl CaptureSession for VideoRecorder {
    type Output = RecordingOutput;

    fn push_frame(&mut self, frame: &CapturedFrame<'_>) -> Result<bool, RecordingError> {
        self.process_frame(frame)
            .map(|outcome| outcome != FrameOutcome::LimitReached)
    }

    fn finish(&mut self) -> Result<RecordingOutput, RecordingError> {
        self.stop()
    }
}

type EncoderFactoryFn = Box<dyn FnMut() -> Box<dyn EncoderFactory> + Send>;

/// Creates one [`VideoRecorder`] per `start_capture`
///
/// All recorders share one watermark renderer, so the glyphs are rasterized
/// once for the lifetime of the factory.
pub struct RecorderSessionFactory {
    settings: RecorderSettings,
    encoders: EncoderFactoryFn,
    watermark: WatermarkRenderer,
}

impl RecorderSessionFactory {
    pub fn new(
        settings: RecorderSettings,
        encoders: impl FnMut() -> Box<dyn EncoderFactory> + Send + 'static,
    ) -> Self {
        let watermark = WatermarkRenderer::new();
        if let Some(wm) = settings.watermark {
            let _ = watermark.spawn_preload(wm.cell_width, wm.cell_height);
        }
        Self {
            settings,
            encoders: Box::new(encoders),
            watermark,
        }
    }

    /// Recorder settings with `params` applied
    pub fn settings_for(&self, params: &CaptureParams) -> RecorderSettings {
        let mut settings = self.settings.clone();
        settings.encoder = params.encoder_config(&self.settings.encoder);
        if let Some(resolution) = params.resolution {
            settings.size = Some((resolution.width, resolution.height));
        }
        if let Some(aspect) = params.aspect_ratio {
            settings.aspect_ratio = Some(aspect);
        }
        settings
    }
}

impl SessionFactory for RecorderSessionFactory {
    type Session = VideoRecorder;

    fn create(&mut self, params: &CaptureParams) -> Result<VideoRecorder, AppError> {
        let settings = self.settings_for(params);
        debug!(params = %params.describe(), "Creating recorder");
        Ok(VideoRecorder::with_watermark(
            settings,
            (self.encoders)(),
            self.watermark.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_limit() {
        assert_eq!(apply_resolution_limit(1280, 720, 1920), (1280, 720));
        assert_eq!(apply_resolution_limit(3840, 2160, 1920), (1920, 1920));
        assert_eq!(apply_resolution_limit(4000, 1000, 1920), (1000, 1000));
        assert_eq!(apply_resolution_limit(3840, 2160, 0), (3840, 2160));
    }

    #[test]
    fn test_params_applied_to_settings() {
        use crate::media::encoders::backend::{EncoderSettings, HardwareEncoder};

        struct NoEncoders;
        impl EncoderFactory for NoEncoders {
            fn open(
                &self,
                codec: VideoCodec,
                _settings: &EncoderSettings,
            ) -> Result<Box<dyn HardwareEncoder>, String> {
                Err(format!("{} unavailable", codec))
            }
        }

        let factory = RecorderSessionFactory::new(
            RecorderSettings {
                watermark: None,
                ..Default::default()
            },
            || Box::new(NoEncoders),
        );
        let settings = factory.settings_for(&CaptureParams {
            resolution: Some(Size::new(1280, 720)),
            bitrate: Some(4.0),
            ..Default::default()
        });
        assert_eq!(settings.size, Some((1280, 720)));
        assert_eq!(settings.encoder.bitrate_override_kbps, Some(4000));
    }

    #[test]
    fn test_file_name_format() {
        let time = chrono::TimeZone::with_ymd_and_hms(&Local, 2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(RecordingOutput::file_name(&time), "video_20240309_140507.mp4");
    }
}
