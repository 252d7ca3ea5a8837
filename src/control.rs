// SPDX-License-Identifier: MPL-2.0

//! Command/status boundary
//!
//! An orchestrator drives capture sessions with JSON commands
//! (`{"command": "start_capture", "payload": {...}}`) and receives JSON
//! status messages (`{"status": "capture_started", "message": "..."}`).
//! [`SessionController`] maps those commands onto one capture session at a
//! time. Every state change is reported through the status callback and
//! finished session output goes to the output callback.

use crate::backends::camera::types::CapturedFrame;
use crate::errors::{AppError, RecordingError, StreamError};
use crate::media::encoders::video::VideoCodec;
use crate::pipelines::video::EncoderConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Width/height pair used for resolutions and aspect ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Capture parameters carried by `start_capture` and `reconfigure`
///
/// Every field is optional; unset fields keep the value of the parameters
/// they are merged onto.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<Size>,
    /// Target bitrate in Mbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<f32>,
    /// Target frame rate; zero means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<VideoCodec>,
}

impl CaptureParams {
    /// `self` with every field set in `overrides` replaced
    pub fn merge(&self, overrides: &CaptureParams) -> CaptureParams {
        CaptureParams {
            resolution: overrides.resolution.or(self.resolution),
            aspect_ratio: overrides.aspect_ratio.or(self.aspect_ratio),
            bitrate: overrides.bitrate.or(self.bitrate),
            fps: overrides.fps.or(self.fps),
            format: overrides.format.or(self.format),
        }
    }

    /// Apply bitrate, frame rate and codec choice to an encoder config
    ///
    /// A requested codec moves to the front of the priority list; the others
    /// stay behind it as fallbacks.
    pub fn encoder_config(&self, base: &EncoderConfig) -> EncoderConfig {
        let mut config = base.clone();
        if let Some(mbps) = self.bitrate.filter(|b| b.is_finite() && *b > 0.0) {
            config.bitrate_override_kbps = Some((mbps * 1000.0).round() as u32);
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(codec) = self.format {
            let mut priority = vec![codec];
            priority.extend(config.codecs().into_iter().filter(|c| *c != codec));
            config.codec_priority = priority;
        }
        config
    }

    /// Short human-readable description used in status messages
    pub fn describe(&self) -> String {
        let size = match (self.resolution, self.aspect_ratio) {
            (Some(r), _) => format!("{}x{}", r.width, r.height),
            (None, Some(a)) => format!("{}:{}", a.width, a.height),
            (None, None) => "native size".to_string(),
        };
        let fps = match self.fps {
            Some(0) => "unlimited fps".to_string(),
            Some(fps) => format!("{}fps", fps),
            None => "default fps".to_string(),
        };
        match self.bitrate {
            Some(mbps) => format!("{}, {} Mbps, {}", size, mbps, fps),
            None => format!("{}, {}", size, fps),
        }
    }
}

/// Command sent by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    StartCapture(Option<CaptureParams>),
    StopCapture,
    /// Stop the running session and start again with merged parameters
    Reconfigure(Option<CaptureParams>),
}

/// Wire shape shared by every command
#[derive(Debug, Serialize, Deserialize)]
struct CommandEnvelope {
    command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<CaptureParams>,
}

impl ServerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ServerCommand::StartCapture(_) => "start_capture",
            ServerCommand::StopCapture => "stop_capture",
            ServerCommand::Reconfigure(_) => "reconfigure",
        }
    }

    /// Parse a JSON command message
    pub fn parse(text: &str) -> Result<Self, StreamError> {
        let envelope: CommandEnvelope = serde_json::from_str(text)
            .map_err(|e| StreamError::Protocol(format!("Malformed command: {}", e)))?;

        match envelope.command.as_str() {
            "start_capture" => Ok(ServerCommand::StartCapture(envelope.payload)),
            "stop_capture" => Ok(ServerCommand::StopCapture),
            "reconfigure" => Ok(ServerCommand::Reconfigure(envelope.payload)),
            other => Err(StreamError::Protocol(format!("Unknown command '{}'", other))),
        }
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        let payload = match self {
            ServerCommand::StartCapture(p) | ServerCommand::Reconfigure(p) => p.clone(),
            ServerCommand::StopCapture => None,
        };
        let envelope = CommandEnvelope {
            command: self.name().to_string(),
            payload,
        };
        serde_json::to_string(&envelope).map_err(|e| StreamError::Protocol(e.to_string()))
    }
}

/// Lifecycle state reported to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ready,
    CaptureStarted,
    CaptureStopped,
    Error,
}

/// Status message sent to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatus {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClientStatus {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of an enum and an optional string always serializes
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"status":"error"}"#))
    }
}

/// A running capture session fed one frame at a time
pub trait CaptureSession {
    type Output;

    /// Process one frame; `Ok(false)` asks the caller to stop the session
    fn push_frame(&mut self, frame: &CapturedFrame<'_>) -> Result<bool, RecordingError>;

    /// Stop the session and hand back what it produced
    fn finish(&mut self) -> Result<Self::Output, RecordingError>;
}

/// Creates capture sessions from merged parameters
pub trait SessionFactory {
    type Session: CaptureSession;

    fn create(&mut self, params: &CaptureParams) -> Result<Self::Session, AppError>;
}

type SessionOutput<F> = <<F as SessionFactory>::Session as CaptureSession>::Output;
type StatusCallback = Box<dyn FnMut(ClientStatus) + Send>;
type OutputCallback<T> = Box<dyn FnMut(T) + Send>;

/// Maps control commands onto one capture session at a time
pub struct SessionController<F: SessionFactory> {
    factory: F,
    defaults: CaptureParams,
    current: CaptureParams,
    session: Option<F::Session>,
    on_status: StatusCallback,
    on_output: OutputCallback<SessionOutput<F>>,
}

impl<F: SessionFactory> SessionController<F> {
    /// `defaults` fill in whatever a `start_capture` payload leaves unset
    pub fn new(factory: F, defaults: CaptureParams) -> Self {
        Self {
            factory,
            current: defaults.clone(),
            defaults,
            session: None,
            on_status: Box::new(|_| {}),
            on_output: Box::new(|_| {}),
        }
    }

    pub fn on_status(mut self, callback: impl FnMut(ClientStatus) + Send + 'static) -> Self {
        self.on_status = Box::new(callback);
        self
    }

    pub fn on_output(mut self, callback: impl FnMut(SessionOutput<F>) + Send + 'static) -> Self {
        self.on_output = Box::new(callback);
        self
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Parameters of the running (or most recent) session
    pub fn params(&self) -> &CaptureParams {
        &self.current
    }

    fn emit(&mut self, status: Status, message: impl Into<String>) {
        let status = ClientStatus::new(status, message);
        debug!(status = ?status.status, message = ?status.message, "Status");
        (self.on_status)(status);
    }

    /// Announce readiness to the orchestrator
    pub fn announce_ready(&mut self) {
        self.emit(Status::Ready, "Client is ready to stream");
    }

    /// Parse and execute a JSON command
    pub fn handle_message(&mut self, text: &str) -> Result<(), AppError> {
        match ServerCommand::parse(text) {
            Ok(command) => self.handle_command(command),
            Err(e) => {
                warn!(error = %e, "Invalid command received");
                self.emit(Status::Error, format!("Invalid command received: {}", text));
                Err(e.into())
            }
        }
    }

    pub fn handle_command(&mut self, command: ServerCommand) -> Result<(), AppError> {
        info!(command = command.name(), "Command received");
        match command {
            ServerCommand::StartCapture(params) => self.start(params.unwrap_or_default()),
            ServerCommand::StopCapture => self.stop(),
            ServerCommand::Reconfigure(params) => self.reconfigure(params.unwrap_or_default()),
        }
    }

    /// Start a session with `params` merged onto the defaults
    pub fn start(&mut self, params: CaptureParams) -> Result<(), AppError> {
        if self.session.is_some() {
            self.emit(Status::Error, "Capture already running");
            return Err(RecordingError::AlreadyRecording.into());
        }
        self.start_merged(self.defaults.merge(&params))
    }

    fn start_merged(&mut self, params: CaptureParams) -> Result<(), AppError> {
        match self.factory.create(&params) {
            Ok(session) => {
                let description = params.describe();
                info!(params = %description, "Capture started");
                self.session = Some(session);
                self.current = params;
                self.emit(
                    Status::CaptureStarted,
                    format!("Capture started: {}", description),
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to start capture");
                self.emit(Status::Error, format!("Failed to start capture: {}", e));
                Err(e)
            }
        }
    }

    /// Stop the running session and deliver its output
    pub fn stop(&mut self) -> Result<(), AppError> {
        let Some(mut session) = self.session.take() else {
            self.emit(Status::Error, "Capture not running");
            return Err(RecordingError::NotRecording.into());
        };

        match session.finish() {
            Ok(output) => {
                (self.on_output)(output);
                self.emit(Status::CaptureStopped, "Capture has been stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Capture stopped without output");
                self.emit(Status::Error, format!("Capture stopped: {}", e));
                Err(e.into())
            }
        }
    }

    /// Stop (if running) and start again with `params` merged onto the
    /// current parameters
    pub fn reconfigure(&mut self, params: CaptureParams) -> Result<(), AppError> {
        let merged = self.current.merge(&params);
        if self.session.is_some()
            && let Err(e) = self.stop()
        {
            debug!(error = %e, "Previous session ended with an error before reconfigure");
        }
        self.start_merged(merged)
    }

    /// Feed one frame to the running session
    ///
    /// Returns whether a session is still running afterwards. A session
    /// that asks to stop is finished and its output delivered; a session that
    /// fails is finished and reported as an error.
    pub fn push_frame(&mut self, frame: &CapturedFrame<'_>) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        match session.push_frame(frame) {
            Ok(true) => true,
            Ok(false) => {
                info!("Session requested stop");
                let _ = self.stop();
                false
            }
            Err(e) => {
                warn!(error = %e, "Capture session failed");
                if let Some(mut session) = self.session.take() {
                    let _ = session.finish();
                }
                self.emit(Status::Error, format!("Capture failed: {}", e));
                false
            }
        }
    }
}
