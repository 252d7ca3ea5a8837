// SPDX-License-Identifier: MPL-2.0

//! Encoder configuration for a recording or streaming session
//!
//! Combines the codec priority list with the bitrate policy and produces the
//! [`EncoderSettings`] each codec attempt is opened with.

use crate::backends::camera::types::ChromaLayout;
use crate::constants::BitratePreset;
use crate::constants::video::{DEFAULT_FPS, KEYFRAME_INTERVAL_SECS};
use crate::media::encoders::backend::EncoderSettings;
use crate::media::encoders::video::{VideoCodec, default_codec_priority};

/// Configuration for encoder selection
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Codecs to try, most preferred first
    pub codec_priority: Vec<VideoCodec>,
    /// Bitrate preset used when no override is given
    pub bitrate_preset: BitratePreset,
    /// Optional bitrate override in kbps (takes precedence over the preset)
    pub bitrate_override_kbps: Option<u32>,
    /// Target frame rate; zero selects the default
    pub fps: u32,
    /// Raw layout the encoder is fed
    pub layout: ChromaLayout,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec_priority: default_codec_priority(),
            bitrate_preset: BitratePreset::default(),
            bitrate_override_kbps: None,
            fps: DEFAULT_FPS,
            layout: ChromaLayout::default(),
        }
    }
}

impl EncoderConfig {
    /// Frame rate with the zero/unset case resolved
    pub fn effective_fps(&self) -> u32 {
        if self.fps == 0 { DEFAULT_FPS } else { self.fps }
    }

    /// Target bitrate in kbps for a frame size
    pub fn bitrate_kbps(&self, width: u32, height: u32) -> u32 {
        self.bitrate_override_kbps
            .unwrap_or_else(|| self.bitrate_preset.bitrate_kbps(width, height))
    }

    /// Settings for opening an encoder at `width`x`height`
    pub fn settings(&self, width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            width,
            height,
            bitrate_bps: self.bitrate_kbps(width, height).saturating_mul(1000),
            fps: self.effective_fps(),
            keyframe_interval_secs: KEYFRAME_INTERVAL_SECS,
            layout: self.layout,
        }
    }

    /// Codec order with the default filled in for an empty list
    pub fn codecs(&self) -> Vec<VideoCodec> {
        if self.codec_priority.is_empty() {
            default_codec_priority()
        } else {
            self.codec_priority.clone()
        }
    }
}
