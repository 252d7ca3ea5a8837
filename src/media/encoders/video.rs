// SPDX-License-Identifier: MPL-2.0

//! Video codec identity and the encoder catalogue
//!
//! Two H.26x codecs are supported. Sessions try them in the configured
//! priority order (HEVC first, H.264 as the fallback by default) and each
//! codec maps to a fixed list of encoder elements, hardware first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video codec types in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// HEVC/H.265 codec (good compression)
    #[serde(rename = "h265", alias = "hevc")]
    HEVC,
    /// H.264 codec (best compatibility)
    #[serde(rename = "h264", alias = "avc")]
    H264,
}

impl VideoCodec {
    /// Parse a codec token such as `h265`, `hevc`, `h264` or `avc`
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "h265" | "hevc" | "h.265" => Some(VideoCodec::HEVC),
            "h264" | "avc" | "h.264" => Some(VideoCodec::H264),
            _ => None,
        }
    }

    /// Short name used in config files and metadata
    pub fn token(&self) -> &'static str {
        match self {
            VideoCodec::HEVC => "h265",
            VideoCodec::H264 => "h264",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::HEVC => "H.265",
            VideoCodec::H264 => "H.264",
        }
    }

    /// MIME type of the elementary stream
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::HEVC => "video/hevc",
            VideoCodec::H264 => "video/avc",
        }
    }

    /// GStreamer caps name of the encoded stream
    pub fn caps_name(&self) -> &'static str {
        match self {
            VideoCodec::HEVC => "video/x-h265",
            VideoCodec::H264 => "video/x-h264",
        }
    }

    /// Get the parser element name
    pub fn parser_name(&self) -> &'static str {
        match self {
            VideoCodec::HEVC => "h265parse",
            VideoCodec::H264 => "h264parse",
        }
    }

    /// MP4 sample entry four-character code
    pub fn sample_entry(&self) -> [u8; 4] {
        match self {
            VideoCodec::HEVC => *b"hvc1",
            VideoCodec::H264 => *b"avc1",
        }
    }

    /// File extension of the container
    pub fn file_extension(&self) -> &'static str {
        "mp4"
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Parse a comma separated codec priority list
///
/// Unknown tokens and duplicates are ignored. An empty result falls back to
/// the default order, HEVC then H.264.
pub fn parse_codec_priority(list: &str) -> Vec<VideoCodec> {
    let mut codecs = Vec::new();
    for codec in list.split(',').filter_map(VideoCodec::from_token) {
        if !codecs.contains(&codec) {
            codecs.push(codec);
        }
    }
    if codecs.is_empty() {
        codecs = default_codec_priority();
    }
    codecs
}

/// HEVC first, H.264 as the fallback
pub fn default_codec_priority() -> Vec<VideoCodec> {
    vec![VideoCodec::HEVC, VideoCodec::H264]
}

/// Information about a known encoder element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderInfo {
    /// GStreamer element name
    pub element_name: &'static str,
    /// Display name for UI
    pub display_name: &'static str,
    /// Codec type
    pub codec: VideoCodec,
    /// Whether this is hardware accelerated
    pub is_hardware: bool,
    /// Priority (lower = higher priority)
    pub priority: u32,
}

const ENCODER_CATALOGUE: &[EncoderInfo] = &[
    // Hardware HEVC/H.265
    EncoderInfo {
        element_name: "vah265enc",
        display_name: "VA-API H.265 (HW)",
        codec: VideoCodec::HEVC,
        is_hardware: true,
        priority: 20,
    },
    EncoderInfo {
        element_name: "nvh265enc",
        display_name: "NVIDIA H.265 (HW)",
        codec: VideoCodec::HEVC,
        is_hardware: true,
        priority: 21,
    },
    EncoderInfo {
        element_name: "v4l2h265enc",
        display_name: "V4L2 H.265 (HW)",
        codec: VideoCodec::HEVC,
        is_hardware: true,
        priority: 22,
    },
    // Software HEVC/H.265
    EncoderInfo {
        element_name: "x265enc",
        display_name: "x265 H.265 (SW)",
        codec: VideoCodec::HEVC,
        is_hardware: false,
        priority: 30,
    },
    // Hardware H.264
    EncoderInfo {
        element_name: "vah264enc",
        display_name: "VA-API H.264 (HW)",
        codec: VideoCodec::H264,
        is_hardware: true,
        priority: 40,
    },
    EncoderInfo {
        element_name: "nvh264enc",
        display_name: "NVIDIA H.264 (HW)",
        codec: VideoCodec::H264,
        is_hardware: true,
        priority: 41,
    },
    EncoderInfo {
        element_name: "v4l2h264enc",
        display_name: "V4L2 H.264 (HW)",
        codec: VideoCodec::H264,
        is_hardware: true,
        priority: 42,
    },
    // Software H.264
    EncoderInfo {
        element_name: "x264enc",
        display_name: "x264 H.264 (SW)",
        codec: VideoCodec::H264,
        is_hardware: false,
        priority: 50,
    },
    EncoderInfo {
        element_name: "openh264enc",
        display_name: "OpenH264 H.264 (SW)",
        codec: VideoCodec::H264,
        is_hardware: false,
        priority: 51,
    },
];

/// All known encoders, sorted by priority
pub fn encoder_catalogue() -> &'static [EncoderInfo] {
    ENCODER_CATALOGUE
}

/// Known encoders for one codec, in priority order
pub fn encoders_for(codec: VideoCodec) -> impl Iterator<Item = &'static EncoderInfo> {
    ENCODER_CATALOGUE.iter().filter(move |e| e.codec == codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_tokens() {
        assert_eq!(VideoCodec::from_token(" HEVC "), Some(VideoCodec::HEVC));
        assert_eq!(VideoCodec::from_token("avc"), Some(VideoCodec::H264));
        assert_eq!(VideoCodec::from_token("vp9"), None);
        assert_eq!(VideoCodec::HEVC.token(), "h265");
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!(
            parse_codec_priority("h264,h265,h264"),
            vec![VideoCodec::H264, VideoCodec::HEVC]
        );
        assert_eq!(parse_codec_priority("av1"), default_codec_priority());
        assert_eq!(parse_codec_priority(""), default_codec_priority());
    }

    #[test]
    fn test_catalogue_sorted_hardware_first() {
        let priorities: Vec<u32> = encoder_catalogue().iter().map(|e| e.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);

        for codec in [VideoCodec::HEVC, VideoCodec::H264] {
            let first = encoders_for(codec).next().unwrap();
            assert!(first.is_hardware);
            assert!(encoders_for(codec).any(|e| !e.is_hardware));
        }
    }

    #[test]
    fn test_serde_uses_tokens() {
        let json = serde_json::to_string(&VideoCodec::HEVC).unwrap();
        assert_eq!(json, "\"h265\"");
        let codec: VideoCodec = serde_json::from_str("\"avc\"").unwrap();
        assert_eq!(codec, VideoCodec::H264);
    }
}
