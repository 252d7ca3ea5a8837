// SPDX-License-Identifier: MPL-2.0

//! Buffer-exchange interface to a hardware video encoder
//!
//! The encoder owns a small pool of input slots. A producer dequeues a free
//! slot (with a timeout), fills it with one raw frame and queues it back with
//! a presentation timestamp. Encoded output is polled separately and arrives
//! as one of three events: a format change carrying the codec configuration,
//! an encoded access unit, or "try again later" when nothing is pending.

use super::video::VideoCodec;
use crate::backends::camera::types::ChromaLayout;
use std::time::Duration;

/// A free input slot handed out by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    pub index: usize,
    /// Maximum payload size in bytes
    pub capacity: usize,
}

/// Flags attached to an encoded access unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessUnitFlags {
    pub keyframe: bool,
    /// Buffer carries only codec configuration, no picture
    pub codec_config: bool,
    pub end_of_stream: bool,
}

/// One encoded access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: AccessUnitFlags,
}

impl AccessUnit {
    pub fn new(data: Vec<u8>, pts_us: i64, flags: AccessUnitFlags) -> Self {
        Self {
            data,
            pts_us,
            flags,
        }
    }

    pub fn is_config_only(&self) -> bool {
        self.flags.codec_config
    }
}

/// Output format advertised by the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderFormat {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Codec-specific data buffers (parameter sets or a config record)
    pub csd: Vec<Vec<u8>>,
}

impl EncoderFormat {
    pub fn has_csd(&self) -> bool {
        self.csd.iter().any(|b| !b.is_empty())
    }
}

/// Result of polling the encoder for output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Output format is known (or changed)
    FormatChanged(EncoderFormat),
    /// An encoded buffer is ready
    Buffer(AccessUnit),
    /// Nothing pending right now
    TryAgainLater,
}

/// Parameters a session configures the encoder with
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub fps: u32,
    pub keyframe_interval_secs: u32,
    pub layout: ChromaLayout,
}

impl EncoderSettings {
    /// Frame interval in microseconds
    pub fn frame_interval_us(&self) -> i64 {
        1_000_000 / self.fps.max(1) as i64
    }

    /// Key-frame interval in frames
    pub fn keyframe_interval_frames(&self) -> u32 {
        (self.fps * self.keyframe_interval_secs).max(1)
    }
}

/// A started encoder instance
pub trait HardwareEncoder: Send {
    /// Codec this instance produces
    fn codec(&self) -> VideoCodec;

    /// Output format already known right after configuration, if the device
    /// reports one
    fn initial_format(&self) -> Option<EncoderFormat> {
        None
    }

    /// Wait up to `timeout` for a free input slot
    fn dequeue_input(&mut self, timeout: Duration) -> Option<InputSlot>;

    /// Return a dequeued slot without submitting data
    fn discard_input(&mut self, _slot: InputSlot) {}

    /// Fill `slot` with `data` and submit it
    fn queue_input(&mut self, slot: InputSlot, data: &[u8], pts_us: i64) -> Result<(), String>;

    /// Queue the end-of-stream marker
    fn signal_end_of_stream(&mut self) -> Result<(), String>;

    /// Poll for output for up to `timeout`
    fn dequeue_output(&mut self, timeout: Duration) -> OutputEvent;

    /// Free device resources; the instance is unusable afterwards
    fn release(&mut self);
}

/// Opens encoder instances for a codec
pub trait EncoderFactory: Send {
    /// Open and configure an encoder, or report why the codec is unavailable
    fn open(
        &self,
        codec: VideoCodec,
        settings: &EncoderSettings,
    ) -> Result<Box<dyn HardwareEncoder>, String>;

    /// Codecs this factory can open at all
    fn available_codecs(&self) -> Vec<VideoCodec> {
        Vec::new()
    }
}
