// SPDX-License-Identifier: MPL-2.0

//! Lab camera frame pipeline
//!
//! This library turns raw camera frames into timestamped H.264/H.265 video,
//! either as MP4 recordings or as a framed live stream.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Frame types, the frame source trait and the newest-frame mailbox
//! - [`media`]: Color conversion, watermark rendering, encoders and bitstream parsing
//! - [`pipelines`]: Encoder driver, MP4 muxing, recording and streaming sessions
//! - [`control`]: JSON command/status boundary and the session controller
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let config = labcam::Config::load();
//! let factory = RecorderSessionFactory::new(config.recorder_settings(), || {
//!     Box::new(GstEncoderFactory)
//! });
//! let mut controller = SessionController::new(factory, config.default_capture_params());
//! controller.handle_message(r#"{"command":"start_capture"}"#)?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod control;
pub mod errors;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use config::Config;
pub use constants::BitratePreset;
pub use control::{CaptureParams, ClientStatus, ServerCommand, SessionController, Status};
pub use errors::{AppError, AppResult, RecordingError, StreamError};
