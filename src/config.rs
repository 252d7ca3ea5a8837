// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::types::ChromaLayout;
use crate::constants::BitratePreset;
use crate::constants::stream::DEFAULT_ADDRESS;
use crate::constants::watermark::{DEFAULT_CELL_HEIGHT, DEFAULT_CELL_WIDTH, DEFAULT_ORIGIN};
use crate::control::CaptureParams;
use crate::errors::{AppError, AppResult};
use crate::media::encoders::video::parse_codec_priority;
use crate::pipelines::stream::StreamSettings;
use crate::pipelines::video::{EncoderConfig, RecorderSettings, WatermarkSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory name under the platform config and video directories
pub const APP_DIR: &str = "labcam";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Longest allowed recording edge; larger requests crop to a centered square
    pub video_resolution_limit: u32,
    /// Default bitrate in Mbps when a command gives none
    pub video_bitrate_mbps: f32,
    /// Default frame rate
    pub video_fps: u32,
    /// Recording stops itself after this many seconds (0 = unlimited)
    pub video_max_duration_seconds: u32,
    /// Comma-separated codec order, e.g. "h265,h264"
    pub video_codec_priority: String,
    /// Bitrate preset used when no explicit bitrate is set
    pub bitrate_preset: BitratePreset,
    pub watermark_enabled: bool,
    pub watermark_cell_width: u32,
    pub watermark_cell_height: u32,
    pub watermark_origin: (u32, u32),
    /// Raw layout handed to the encoder
    pub chroma_layout: ChromaLayout,
    /// Drop frames with malformed plane geometry instead of substituting
    /// neutral chroma
    pub strict_geometry: bool,
    /// Default streaming endpoint
    pub stream_address: String,
    /// Where recordings are saved; `None` uses the platform video directory
    pub output_folder: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video_resolution_limit: 1920,
            video_bitrate_mbps: 2.0,
            video_fps: 4,
            video_max_duration_seconds: 60,
            video_codec_priority: "h265,h264".to_string(),
            bitrate_preset: BitratePreset::default(), // Default to Medium
            watermark_enabled: true,
            watermark_cell_width: DEFAULT_CELL_WIDTH,
            watermark_cell_height: DEFAULT_CELL_HEIGHT,
            watermark_origin: DEFAULT_ORIGIN,
            chroma_layout: ChromaLayout::default(),
            strict_geometry: false,
            stream_address: DEFAULT_ADDRESS.to_string(),
            output_folder: None,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`; a missing or unreadable file yields the defaults
    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt config, using defaults");
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> AppResult<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Config("No config directory available".into()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| AppError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Folder recordings are written to
    pub fn output_folder(&self) -> PathBuf {
        self.output_folder.clone().unwrap_or_else(|| {
            dirs::video_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
                .join(APP_DIR)
        })
    }

    fn watermark_settings(&self) -> Option<WatermarkSettings> {
        self.watermark_enabled.then_some(WatermarkSettings {
            cell_width: self.watermark_cell_width,
            cell_height: self.watermark_cell_height,
            origin_x: self.watermark_origin.0,
            origin_y: self.watermark_origin.1,
        })
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            codec_priority: parse_codec_priority(&self.video_codec_priority),
            bitrate_preset: self.bitrate_preset,
            bitrate_override_kbps: None,
            fps: self.video_fps,
            layout: self.chroma_layout,
        }
    }

    /// Parameters a `start_capture` without payload falls back to
    pub fn default_capture_params(&self) -> CaptureParams {
        CaptureParams {
            bitrate: (self.video_bitrate_mbps > 0.0).then_some(self.video_bitrate_mbps),
            fps: Some(self.video_fps),
            ..Default::default()
        }
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            encoder: self.encoder_config(),
            resolution_limit: self.video_resolution_limit,
            watermark: self.watermark_settings(),
            max_duration: (self.video_max_duration_seconds > 0)
                .then(|| Duration::from_secs(self.video_max_duration_seconds as u64)),
            strict_geometry: self.strict_geometry,
            ..Default::default()
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            encoder: self.encoder_config(),
            target_fps: self.video_fps,
            watermark: self.watermark_settings(),
            strict_geometry: self.strict_geometry,
            ..Default::default()
        }
    }
}
