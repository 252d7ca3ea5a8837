// SPDX-License-Identifier: MPL-2.0

//! Streaming session
//!
//! Same per-frame path as a recording (convert, watermark, encode) but the
//! encoder output goes to a [`StreamSink`] instead of a container, and a
//! frame-rate gate runs before conversion so skipped frames cost nothing.

use super::crop::stream_crop_rect;
use super::sink::{StreamSink, StreamSummary};
use super::transport::Transport;
use crate::backends::camera::types::{CapturedFrame, CropRect, SensorRotation};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::constants::video::DEFAULT_FPS;
use crate::control::{CaptureParams, CaptureSession, SessionFactory, Size};
use crate::errors::{AppError, RecordingError, StreamError};
use crate::media::encoders::backend::EncoderFactory;
use crate::media::nv12_converter::ColorConverter;
use crate::media::watermark::{self, WatermarkRenderer};
use crate::pipelines::video::{
    EncoderConfig, EncoderDriver, SessionSummary, SubmitOutcome, WatermarkSettings,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Streaming session parameters
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub encoder: EncoderConfig,
    pub rotation: SensorRotation,
    pub resolution: Option<Size>,
    pub aspect_ratio: Option<Size>,
    /// Frames per second let through the gate; zero is unlimited
    pub target_fps: u32,
    pub watermark: Option<WatermarkSettings>,
    pub strict_geometry: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            rotation: SensorRotation::None,
            resolution: None,
            aspect_ratio: None,
            target_fps: DEFAULT_FPS,
            watermark: Some(WatermarkSettings::default()),
            strict_geometry: false,
        }
    }
}

impl StreamSettings {
    /// These settings with `params` applied
    pub fn with_params(&self, params: &CaptureParams) -> Self {
        Self {
            encoder: params.encoder_config(&self.encoder),
            rotation: self.rotation,
            resolution: params.resolution.or(self.resolution),
            aspect_ratio: params.aspect_ratio.or(self.aspect_ratio),
            target_fps: params.fps.unwrap_or(self.target_fps),
            watermark: self.watermark,
            strict_geometry: self.strict_geometry,
        }
    }
}

/// Finished stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamOutput {
    pub stream: StreamSummary,
    pub session: SessionSummary,
}

/// One streaming session from first frame to closed transport
pub struct StreamSession<T: Transport> {
    settings: StreamSettings,
    converter: ColorConverter,
    watermark: WatermarkRenderer,
    driver: EncoderDriver<StreamSink<T>>,
    /// Sink waiting for the lazy encoder start
    pending: Option<StreamSink<T>>,
    crop: Option<CropRect>,
    frames_seen: u64,
}

impl<T: Transport> StreamSession<T> {
    pub fn new(
        settings: StreamSettings,
        factory: Box<dyn EncoderFactory>,
        transport: T,
        watermark: WatermarkRenderer,
    ) -> Self {
        let converter = ColorConverter::new(settings.encoder.layout)
            .with_strict_geometry(settings.strict_geometry);
        Self {
            settings,
            converter,
            watermark,
            driver: EncoderDriver::new(factory),
            pending: Some(StreamSink::new(transport)),
            crop: None,
            frames_seen: 0,
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn is_streaming(&self) -> bool {
        self.driver.is_running()
    }

    pub fn sink(&self) -> Option<&StreamSink<T>> {
        self.pending.as_ref().or_else(|| self.driver.sink())
    }

    fn sink_mut(&mut self) -> Option<&mut StreamSink<T>> {
        if let Some(sink) = self.pending.as_mut() {
            return Some(sink);
        }
        self.driver.sink_mut()
    }

    fn ensure_started(&mut self, frame: &CapturedFrame<'_>) -> Result<CropRect, RecordingError> {
        if let Some(crop) = self.crop
            && self.driver.is_running()
        {
            return Ok(crop);
        }
        if frame.width == 0 || frame.height == 0 {
            return Err(RecordingError::StartFailed(format!(
                "Empty frame {}x{}",
                frame.width, frame.height
            )));
        }
        if self.pending.is_none() {
            return Err(RecordingError::StartFailed(
                "Stream transport is no longer available".into(),
            ));
        }

        let crop = stream_crop_rect(
            frame.width,
            frame.height,
            self.settings.rotation,
            frame.crop,
            self.settings.resolution,
            self.settings.aspect_ratio,
        );
        let (width, height) = (crop.width() as u32, crop.height() as u32);
        self.driver
            .start_from(&self.settings.encoder, width, height, &mut self.pending)?;
        self.crop = Some(crop);
        info!(
            width,
            height,
            crop = %crop,
            target_fps = self.settings.target_fps,
            "Streaming started"
        );
        Ok(crop)
    }

    /// Process one captured frame
    ///
    /// Returns `Ok(false)` once the transport is closed for good.
    pub fn process_frame(&mut self, frame: &CapturedFrame<'_>) -> Result<bool, RecordingError> {
        if self.sink().is_some_and(|s| s.is_closed()) {
            return Ok(false);
        }

        let now_ns = (frame.timestamp_us.max(0) as u64).saturating_mul(1000);
        let target_fps = self.settings.target_fps;
        if let Some(sink) = self.sink_mut()
            && !sink.should_send(target_fps, now_ns)
        {
            return Ok(true);
        }

        let crop = self.ensure_started(frame)?;
        let mut buffer = match self.converter.convert(frame, crop, self.settings.rotation) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(error = %e, "Frame rejected");
                return Ok(true);
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
        if report.outcome != SubmitOutcome::Queued {
            debug!(outcome = ?report.outcome, "Stream frame dropped");
        }

        self.frames_seen += 1;
        if self.frames_seen % FRAME_LOG_INTERVAL == 0
            && let Some(sink) = self.driver.sink()
        {
            debug!(
                frames = self.frames_seen,
                sent = sink.sent(),
                gated = sink.gated(),
                "Streaming progress"
            );
        }

        Ok(true)
    }

    /// Stop encoding and close the transport
    pub fn stop(&mut self) -> Result<StreamOutput, RecordingError> {
        self.crop = None;
        self.frames_seen = 0;

        if let Some(mut sink) = self.pending.take() {
            debug!("Stream stopped before the first frame");
            sink.close();
            return Err(RecordingError::NoSamples);
        }

        let encoded = self.driver.stop()?;
        Ok(StreamOutput {
            stream: encoded.output,
            session: encoded.summary,
        })
    }
}

impl<T: Transport> CaptureSession for StreamSession<T> {
    type Output = StreamOutput;

    fn push_frame(&mut self, frame: &CapturedFrame<'_>) -> Result<bool, RecordingError> {
        self.process_frame(frame)
    }

    fn finish(&mut self) -> Result<StreamOutput, RecordingError> {
        self.stop()
    }
}

type EncoderFactoryFn = Box<dyn FnMut() -> Box<dyn EncoderFactory> + Send>;
type ConnectFn<T> = Box<dyn FnMut() -> Result<T, StreamError> + Send>;

/// Creates a streaming session with a fresh transport per `start_capture`
pub struct StreamSessionFactory<T: Transport> {
    settings: StreamSettings,
    encoders: EncoderFactoryFn,
    connect: ConnectFn<T>,
    watermark: WatermarkRenderer,
}

impl<T: Transport> StreamSessionFactory<T> {
    pub fn new(
        settings: StreamSettings,
        encoders: impl FnMut() -> Box<dyn EncoderFactory> + Send + 'static,
        connect: impl FnMut() -> Result<T, StreamError> + Send + 'static,
    ) -> Self {
        let watermark = WatermarkRenderer::new();
        if let Some(wm) = settings.watermark {
            let _ = watermark.spawn_preload(wm.cell_width, wm.cell_height);
        }
        Self {
            settings,
            encoders: Box::new(encoders),
            connect: Box::new(connect),
            watermark,
        }
    }

    pub fn watermark(&self) -> &WatermarkRenderer {
        &self.watermark
    }
}

impl<T: Transport> SessionFactory for StreamSessionFactory<T> {
    type Session = StreamSession<T>;

    fn create(&mut self, params: &CaptureParams) -> Result<StreamSession<T>, AppError> {
        let settings = self.settings.with_params(params);
        let transport = (self.connect)()?;
        Ok(StreamSession::new(
            settings,
            (self.encoders)(),
            transport,
            self.watermark.clone(),
        ))
    }
}
