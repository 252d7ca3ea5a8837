// SPDX-License-Identifier: MPL-2.0

//! Video recording pipeline
//!
//! This module provides the encode side of a capture session:
//! - Drives a hardware encoder through its buffer-exchange protocol
//! - Falls back to the secondary codec when the preferred one cannot open
//! - Starts the MP4 track from whichever configuration data shows up first
//! - Writes the finished recording plus a JSON metadata sidecar

pub mod driver;
pub mod encoder_selection;
pub mod mp4;
pub mod muxer;
pub mod recorder;

// Re-export commonly used types
pub use driver::{
    AccessUnitSink, EncodedOutput, EncoderDriver, EncoderStats, MuxState, SessionSummary,
    SubmitOutcome, SubmitReport,
};
pub use encoder_selection::EncoderConfig;
pub use muxer::{ContainerMuxer, FormatDescriptor, MUX_START_STRATEGIES, MuxStartStrategy};
pub use recorder::{
    FrameOutcome, RecorderSessionFactory, RecorderSettings, RecordingOutput, VideoRecorder,
    WatermarkSettings, apply_resolution_limit,
};
