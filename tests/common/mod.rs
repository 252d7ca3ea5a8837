// SPDX-License-Identifier: MPL-2.0

//! Scripted encoder used by the integration tests
//!
//! Behaves like a buffer-exchange device whose codec configuration arrives
//! through one chosen channel. Every queued frame produces exactly one
//! access unit immediately, so a drain after each submit sees it.

#![allow(dead_code)]

use labcam::backends::camera::{ChromaLayout, FrameData, PixelBuffer};
use labcam::media::encoders::{
    AccessUnit, AccessUnitFlags, EncoderFactory, EncoderFormat, EncoderSettings,
    HardwareEncoder, InputSlot, OutputEvent, VideoCodec,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const H264_SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80];
pub const H264_PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
pub const HEVC_VPS: &[u8] = &[0x40, 0x01, 0x0C, 0x01, 0xFF];
pub const HEVC_SPS: &[u8] = &[
    0x42, 0x01, 0x01, 0x01, 0x60, 0x11, 0x22, 0x33, 0x90, 0x11, 0x11, 0x11, 0x11, 0x11, 0x5D,
    0xA0,
];
pub const HEVC_PPS: &[u8] = &[0x44, 0x01, 0xC1, 0x72];

pub fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

/// Parameter sets of `codec`, VPS first for HEVC
pub fn parameter_sets(codec: VideoCodec) -> Vec<&'static [u8]> {
    match codec {
        VideoCodec::H264 => vec![H264_SPS, H264_PPS],
        VideoCodec::HEVC => vec![HEVC_VPS, HEVC_SPS, HEVC_PPS],
    }
}

/// Channel the scripted encoder reports its configuration through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDelivery {
    /// Known right after configuration
    Advertised,
    /// Format-changed event before the first access unit
    FormatChanged,
    /// Config-only buffer before the first access unit
    ConfigBuffer,
    /// Parameter sets inside every keyframe
    InBand,
    /// Never
    Missing,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub config: ConfigDelivery,
    pub slot_capacity: usize,
    /// Input slots available for the whole session; `None` is unlimited
    pub slots: Option<usize>,
    /// Keyframe every `keyframe_interval` frames
    pub keyframe_interval: u64,
    /// Frames before the first keyframe
    pub leading_non_keyframes: u64,
    /// Codecs whose open fails
    pub unavailable: Vec<VideoCodec>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            config: ConfigDelivery::Advertised,
            slot_capacity: usize::MAX,
            slots: None,
            keyframe_interval: 10,
            leading_non_keyframes: 0,
            unavailable: Vec::new(),
        }
    }
}

impl Script {
    pub fn with_config(config: ConfigDelivery) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }
}

/// What the encoders of one factory saw
#[derive(Debug, Default)]
pub struct EncoderLog {
    pub opened: Vec<VideoCodec>,
    pub queued_pts: Vec<i64>,
    pub settings: Vec<EncoderSettings>,
    pub eos_signalled: bool,
    pub released: usize,
}

#[derive(Clone)]
pub struct ScriptedFactory {
    script: Script,
    log: Arc<Mutex<EncoderLog>>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(EncoderLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<EncoderLog>> {
        Arc::clone(&self.log)
    }

    pub fn boxed(&self) -> Box<dyn EncoderFactory> {
        Box::new(self.clone())
    }
}

impl EncoderFactory for ScriptedFactory {
    fn open(
        &self,
        codec: VideoCodec,
        settings: &EncoderSettings,
    ) -> Result<Box<dyn HardwareEncoder>, String> {
        if self.script.unavailable.contains(&codec) {
            return Err(format!("no {} encoder on this device", codec));
        }
        {
            let mut log = self.log.lock().unwrap();
            log.opened.push(codec);
            log.settings.push(settings.clone());
        }
        Ok(Box::new(ScriptedEncoder {
            codec,
            width: settings.width,
            height: settings.height,
            script: self.script.clone(),
            log: Arc::clone(&self.log),
            pending: VecDeque::new(),
            frames: 0,
            slots_used: 0,
            last_pts_us: 0,
            announced: false,
        }))
    }

    fn available_codecs(&self) -> Vec<VideoCodec> {
        [VideoCodec::HEVC, VideoCodec::H264]
            .into_iter()
            .filter(|c| !self.script.unavailable.contains(c))
            .collect()
    }
}

pub struct ScriptedEncoder {
    codec: VideoCodec,
    width: u32,
    height: u32,
    script: Script,
    log: Arc<Mutex<EncoderLog>>,
    pending: VecDeque<OutputEvent>,
    frames: u64,
    slots_used: usize,
    last_pts_us: i64,
    announced: bool,
}

impl ScriptedEncoder {
    fn format(&self) -> EncoderFormat {
        EncoderFormat {
            codec: self.codec,
            width: self.width,
            height: self.height,
            csd: parameter_sets(self.codec)
                .into_iter()
                .map(|nal| annex_b(&[nal]))
                .collect(),
        }
    }

    fn picture(&self, keyframe: bool) -> Vec<u8> {
        // Non-zero tail byte keeps the payload free of start codes
        let tag = 0x80 | (self.frames as u8 & 0x7F);
        let nal: Vec<u8> = match (self.codec, keyframe) {
            (VideoCodec::H264, true) => vec![0x65, 0x88, tag],
            (VideoCodec::H264, false) => vec![0x41, 0x9A, tag],
            (VideoCodec::HEVC, true) => vec![0x26, 0x01, tag],
            (VideoCodec::HEVC, false) => vec![0x02, 0x01, tag],
        };

        if keyframe && self.script.config == ConfigDelivery::InBand {
            let mut nals = parameter_sets(self.codec);
            nals.push(&nal);
            annex_b(&nals)
        } else {
            annex_b(&[&nal])
        }
    }

    fn is_keyframe(&self, index: u64) -> bool {
        index >= self.script.leading_non_keyframes
            && (index - self.script.leading_non_keyframes) % self.script.keyframe_interval.max(1)
                == 0
    }
}

impl HardwareEncoder for ScriptedEncoder {
    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn initial_format(&self) -> Option<EncoderFormat> {
        (self.script.config == ConfigDelivery::Advertised).then(|| self.format())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Option<InputSlot> {
        if let Some(limit) = self.script.slots
            && self.slots_used >= limit
        {
            return None;
        }
        self.slots_used += 1;
        Some(InputSlot {
            index: self.slots_used - 1,
            capacity: self.script.slot_capacity,
        })
    }

    fn queue_input(&mut self, _slot: InputSlot, _data: &[u8], pts_us: i64) -> Result<(), String> {
        self.log.lock().unwrap().queued_pts.push(pts_us);

        if !self.announced {
            self.announced = true;
            match self.script.config {
                ConfigDelivery::FormatChanged => {
                    self.pending.push_back(OutputEvent::FormatChanged(self.format()));
                }
                ConfigDelivery::ConfigBuffer => {
                    let flags = AccessUnitFlags {
                        codec_config: true,
                        ..Default::default()
                    };
                    let data = annex_b(&parameter_sets(self.codec));
                    self.pending
                        .push_back(OutputEvent::Buffer(AccessUnit::new(data, 0, flags)));
                }
                _ => {}
            }
        }

        let keyframe = self.is_keyframe(self.frames);
        let data = self.picture(keyframe);
        self.frames += 1;
        self.last_pts_us = pts_us;
        let flags = AccessUnitFlags {
            keyframe,
            ..Default::default()
        };
        self.pending
            .push_back(OutputEvent::Buffer(AccessUnit::new(data, pts_us, flags)));
        Ok(())
    }

    fn signal_end_of_stream(&mut self) -> Result<(), String> {
        self.log.lock().unwrap().eos_signalled = true;
        let flags = AccessUnitFlags {
            end_of_stream: true,
            ..Default::default()
        };
        self.pending.push_back(OutputEvent::Buffer(AccessUnit::new(
            Vec::new(),
            self.last_pts_us,
            flags,
        )));
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> OutputEvent {
        self.pending.pop_front().unwrap_or(OutputEvent::TryAgainLater)
    }

    fn release(&mut self) {
        self.log.lock().unwrap().released += 1;
    }
}

/// Packed NV12 buffer filled with one luma value and neutral chroma
pub fn pixel_buffer(width: u32, height: u32, luma: u8, timestamp_us: i64) -> PixelBuffer {
    let luma_len = (width * height) as usize;
    let mut data = vec![luma; luma_len];
    data.resize(PixelBuffer::expected_len(width, height), 128);
    PixelBuffer {
        data,
        width,
        height,
        layout: ChromaLayout::Nv12,
        timestamp_us,
    }
}

/// Owned NV12 frame whose luma value at `(x, y)` is `(x + y * width) % 251`
pub fn gradient_frame(width: u32, height: u32, timestamp_us: i64) -> FrameData {
    let luma_len = (width * height) as usize;
    let mut data: Vec<u8> = (0..luma_len).map(|i| (i % 251) as u8).collect();
    data.resize(luma_len * 3 / 2, 128);
    FrameData::from_nv12(data, width, height, timestamp_us)
}

/// Position of the first `fourcc` box header in `data`
pub fn find_box(data: &[u8], fourcc: &[u8; 4]) -> Option<usize> {
    data.windows(4).position(|w| w == fourcc).map(|p| p - 4)
}
