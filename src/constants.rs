// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video encoder bitrate presets
///
/// Used when a session does not carry an explicit bitrate. Lab recordings run
/// at low frame rates, so the tiers sit well below typical camcorder bitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    /// All preset variants, lowest first
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Get bitrate in kbps for a given resolution
    ///
    /// - SD (640x480): Low=0.5, Medium=1, High=2 Mbps
    /// - HD (1280x720): Low=1, Medium=2, High=4 Mbps
    /// - Full HD (1920x1080): Low=2, Medium=4, High=8 Mbps
    /// - UHD (3840x2160): Low=6, Medium=12, High=24 Mbps
    pub fn bitrate_kbps(&self, width: u32, height: u32) -> u32 {
        // Portrait sessions are tiered by their long edge
        self.bitrate_for_tier(get_resolution_tier(width.max(height)))
    }

    /// Get the bitrate for a specific resolution tier
    pub fn bitrate_for_tier(&self, tier: ResolutionTier) -> u32 {
        match (tier, self) {
            (ResolutionTier::SD, BitratePreset::Low) => 500,
            (ResolutionTier::SD, BitratePreset::Medium) => 1_000,
            (ResolutionTier::SD, BitratePreset::High) => 2_000,
            (ResolutionTier::HD, BitratePreset::Low) => 1_000,
            (ResolutionTier::HD, BitratePreset::Medium) => 2_000,
            (ResolutionTier::HD, BitratePreset::High) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 2_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 8_000,
            (ResolutionTier::UHD, BitratePreset::Low) => 6_000,
            (ResolutionTier::UHD, BitratePreset::Medium) => 12_000,
            (ResolutionTier::UHD, BitratePreset::High) => 24_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// SD: 640x480 and below
    SD,
    /// HD: 1280x720
    HD,
    /// Full HD: 1920x1080
    FullHD,
    /// UHD: 3840x2160 and above
    UHD,
}

/// Get the resolution tier for the long edge of a frame
pub fn get_resolution_tier(long_edge: u32) -> ResolutionTier {
    match long_edge {
        w if w >= 3840 => ResolutionTier::UHD,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format bitrate for display (e.g., "8 Mbps" or "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Video session constants
pub mod video {
    /// Frame rate used when a session asks for an unlimited (<= 0) rate
    pub const DEFAULT_FPS: u32 = 10;

    /// Key-frame interval in seconds
    pub const KEYFRAME_INTERVAL_SECS: u32 = 1;

    /// Chroma value substituted for unreadable samples (mid-grey)
    pub const NEUTRAL_CHROMA: u8 = 128;

    /// Luma value substituted for unreadable samples
    pub const FALLBACK_LUMA: u8 = 0;

    /// MP4 media timescale (ticks per second)
    pub const MEDIA_TIMESCALE: u32 = 90_000;

    /// MP4 movie timescale (ticks per second)
    pub const MOVIE_TIMESCALE: u32 = 1_000;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Bounded wait for a free encoder input slot
    pub const INPUT_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

    /// Bounded wait per output-record poll during a drain pass
    pub const OUTPUT_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

    /// Grace period for the encoder to flush trailing output after end-of-stream
    pub const EOS_GRACE_PERIOD: Duration = Duration::from_millis(500);

    /// Poll interval used by the frame-processing thread while idle
    pub const FRAME_WAIT_INTERVAL: Duration = Duration::from_millis(50);

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;
}

/// Watermark constants
pub mod watermark {
    /// Characters rasterized at preload time
    pub const ALPHABET: &str = "0123456789-: Time";

    /// Literal prefix of the timestamp text
    pub const TEXT_PREFIX: &str = "Time: ";

    /// Padding around the text inside the background rectangle
    pub const PADDING: u32 = 4;

    /// Background rectangle luma
    pub const BACKGROUND_LUMA: u8 = 0;

    /// Glyph foreground luma
    pub const FOREGROUND_LUMA: u8 = 255;

    /// Default glyph cell width
    pub const DEFAULT_CELL_WIDTH: u32 = 20;

    /// Default glyph cell height
    pub const DEFAULT_CELL_HEIGHT: u32 = 30;

    /// Default inset from the frame's top-left corner
    pub const DEFAULT_ORIGIN: (u32, u32) = (10, 10);
}

/// Streaming constants
pub mod stream {
    /// Size of the big-endian frame header
    pub const HEADER_LEN: usize = 16;

    /// Crop dimensions are aligned down to this many pixels
    pub const CROP_ALIGNMENT: u32 = 32;

    /// Messages buffered between the frame thread and the socket writer
    pub const TRANSPORT_QUEUE_DEPTH: usize = 8;

    /// Default streaming endpoint
    pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8765";
}
