// SPDX-License-Identifier: MPL-2.0

//! GStreamer-backed [`HardwareEncoder`]
//!
//! Pipeline: `appsrc ! <encoder> ! <parser> ! capsfilter ! appsink`. The
//! appsrc queue plays the role of the encoder's input slot pool and the
//! appsink is polled for encoded access units. The parser re-inserts
//! parameter sets before every keyframe and the capsfilter pins Annex-B
//! byte-stream output aligned to access units.

use super::backend::{
    AccessUnit, AccessUnitFlags, EncoderFactory, EncoderFormat, EncoderSettings,
    HardwareEncoder, InputSlot, OutputEvent,
};
use super::detection::is_element_available;
use super::video::{EncoderInfo, VideoCodec, encoders_for};
use crate::backends::camera::types::{ChromaLayout, PixelBuffer};
use crate::media::formats::codec;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use gstreamer_video as gst_video;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Raw frames the appsrc may hold before input slots run out
const INPUT_SLOTS: u64 = 4;

/// Poll step while waiting for a free input slot
const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Set a property from its string form if the element has it
fn set_if_present(element: &gst::Element, name: &str, value: &str) {
    if element.find_property(name).is_some() {
        element.set_property_from_str(name, value);
    } else {
        debug!(property = name, "Encoder has no such property, skipping");
    }
}

/// Configure encoder based on element type
fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, settings: &EncoderSettings) {
    let bitrate_kbps = (settings.bitrate_bps / 1000).max(1);
    let gop = settings.keyframe_interval_frames().to_string();

    match encoder_name {
        // x264 software encoder
        "x264enc" => {
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "bitrate", &bitrate_kbps.to_string());
            set_if_present(encoder, "key-int-max", &gop);
        }

        // x265 software encoder
        "x265enc" => {
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "bitrate", &bitrate_kbps.to_string());
            set_if_present(encoder, "key-int-max", &gop);
        }

        // VA-API encoders
        "vah264enc" | "vah265enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &bitrate_kbps.to_string());
            set_if_present(encoder, "key-int-max", &gop);
        }

        // NVIDIA encoders
        "nvh264enc" | "nvh265enc" => {
            set_if_present(encoder, "bitrate", &bitrate_kbps.to_string());
            set_if_present(encoder, "rc-mode", "cbr");
            set_if_present(encoder, "gop-size", &gop);
        }

        // V4L2 encoders take their settings through extra-controls
        "v4l2h264enc" | "v4l2h265enc" => {
            debug!("Using V4L2 encoder with default configuration");
        }

        // OpenH264 takes bits per second
        "openh264enc" => {
            set_if_present(encoder, "rate-control", "bitrate");
            set_if_present(encoder, "bitrate", &settings.bitrate_bps.to_string());
            set_if_present(encoder, "usage-type", "camera");
            set_if_present(encoder, "gop-size", &gop);
        }

        _ => {
            debug!("Unknown encoder type, using default configuration");
        }
    }

    debug!(
        encoder = encoder_name,
        bitrate_kbps,
        gop = %gop,
        "Configured video encoder"
    );
}

/// Encoder instance backed by a GStreamer pipeline
pub struct GstEncoder {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    appsink: AppSink,
    codec: VideoCodec,
    width: u32,
    height: u32,
    frame_len: usize,
    next_slot: usize,
    format_sent: bool,
    pending: Option<AccessUnit>,
    eos_delivered: bool,
    released: bool,
}

impl GstEncoder {
    fn new(info: &EncoderInfo, settings: &EncoderSettings) -> Result<Self, String> {
        gst::init().map_err(|e| format!("Failed to initialize GStreamer: {}", e))?;

        let video_format = match settings.layout {
            ChromaLayout::Nv12 => gst_video::VideoFormat::Nv12,
            ChromaLayout::I420 => gst_video::VideoFormat::I420,
        };
        let video_info = gst_video::VideoInfo::builder(video_format, settings.width, settings.height)
            .fps(gst::Fraction::new(settings.fps.max(1) as i32, 1))
            .build()
            .map_err(|e| format!("Invalid video info: {}", e))?;
        let input_caps = video_info
            .to_caps()
            .map_err(|e| format!("Failed to build input caps: {}", e))?;

        let frame_len = PixelBuffer::expected_len(settings.width, settings.height);

        let appsrc = gst::ElementFactory::make("appsrc")
            .name("encoder_src")
            .build()
            .map_err(|e| format!("Failed to create appsrc: {}", e))?
            .downcast::<AppSrc>()
            .map_err(|_| "Failed to downcast to AppSrc".to_string())?;
        appsrc.set_caps(Some(&input_caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_max_bytes(frame_len as u64 * INPUT_SLOTS);

        let encoder = gst::ElementFactory::make(info.element_name)
            .build()
            .map_err(|e| format!("Failed to create encoder {}: {}", info.element_name, e))?;
        configure_video_encoder(&encoder, info.element_name, settings);

        let parser = gst::ElementFactory::make(info.codec.parser_name())
            .build()
            .map_err(|e| format!("Failed to create parser {}: {}", info.codec.parser_name(), e))?;
        set_if_present(&parser, "config-interval", "-1");

        let output_caps = gst::Caps::builder(info.codec.caps_name())
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &output_caps)
            .build()
            .map_err(|e| format!("Failed to create capsfilter: {}", e))?;

        let appsink = gst::ElementFactory::make("appsink")
            .name("encoder_sink")
            .build()
            .map_err(|e| format!("Failed to create appsink: {}", e))?
            .downcast::<AppSink>()
            .map_err(|_| "Failed to downcast to AppSink".to_string())?;
        appsink.set_sync(false);
        appsink.set_property("emit-signals", false);

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &encoder,
                &parser,
                &capsfilter,
                appsink.upcast_ref(),
            ])
            .map_err(|e| format!("Failed to add elements: {}", e))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &encoder,
            &parser,
            &capsfilter,
            appsink.upcast_ref(),
        ])
        .map_err(|e| format!("Failed to link encoder pipeline: {}", e))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| format!("Failed to start encoder pipeline: {}", e))?;

        info!(
            encoder = info.element_name,
            codec = %info.codec,
            hardware = info.is_hardware,
            width = settings.width,
            height = settings.height,
            "Encoder pipeline started"
        );

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            codec: info.codec,
            width: settings.width,
            height: settings.height,
            frame_len,
            next_slot: 0,
            format_sent: false,
            pending: None,
            eos_delivered: false,
            released: false,
        })
    }

    fn slot_free(&self) -> bool {
        self.appsrc.current_level_bytes() + self.frame_len as u64
            <= self.frame_len as u64 * INPUT_SLOTS
    }

    fn access_unit_from(sample: &gst::Sample) -> Option<AccessUnit> {
        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;
        let flags = buffer.flags();
        let pts_us = buffer.pts().map_or(0, |pts| pts.useconds() as i64);

        Some(AccessUnit::new(
            map.as_slice().to_vec(),
            pts_us,
            AccessUnitFlags {
                keyframe: !flags.contains(gst::BufferFlags::DELTA_UNIT),
                codec_config: flags.contains(gst::BufferFlags::HEADER),
                end_of_stream: false,
            },
        ))
    }
}

impl HardwareEncoder for GstEncoder {
    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn dequeue_input(&mut self, timeout: Duration) -> Option<InputSlot> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.slot_free() {
                let index = self.next_slot;
                self.next_slot = (self.next_slot + 1) % INPUT_SLOTS as usize;
                return Some(InputSlot {
                    index,
                    capacity: self.frame_len,
                });
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(SLOT_POLL_INTERVAL);
        }
    }

    fn queue_input(&mut self, slot: InputSlot, data: &[u8], pts_us: i64) -> Result<(), String> {
        if data.len() > slot.capacity {
            return Err(format!(
                "Payload of {} bytes exceeds slot capacity {}",
                data.len(),
                slot.capacity
            ));
        }

        let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gst::ClockTime::from_useconds(pts_us.max(0) as u64));
        }

        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| format!("Failed to push frame: {:?}", e))
    }

    fn signal_end_of_stream(&mut self) -> Result<(), String> {
        self.appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| format!("Failed to send EOS: {:?}", e))
    }

    fn dequeue_output(&mut self, timeout: Duration) -> OutputEvent {
        if self.format_sent
            && let Some(unit) = self.pending.take()
        {
            return OutputEvent::Buffer(unit);
        }

        let timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() && !self.eos_delivered {
                self.eos_delivered = true;
                return OutputEvent::Buffer(AccessUnit::new(
                    Vec::new(),
                    0,
                    AccessUnitFlags {
                        end_of_stream: true,
                        ..Default::default()
                    },
                ));
            }
            return OutputEvent::TryAgainLater;
        };

        let Some(unit) = Self::access_unit_from(&sample) else {
            warn!("Encoder produced an unreadable sample, skipping");
            return OutputEvent::TryAgainLater;
        };

        if !self.format_sent {
            // Byte-stream output has no out-of-band config; announce the
            // format with whatever parameter sets the first unit carries
            self.format_sent = true;
            let sets = codec::extract_parameter_sets(self.codec, &unit.data);
            let csd = sets
                .vps
                .iter()
                .chain(&sets.sps)
                .chain(&sets.pps)
                .cloned()
                .collect();
            self.pending = Some(unit);
            return OutputEvent::FormatChanged(EncoderFormat {
                codec: self.codec,
                width: self.width,
                height: self.height,
                csd,
            });
        }

        OutputEvent::Buffer(unit)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            error!(?e, "Failed to set encoder pipeline to Null");
        }
        debug!("Encoder pipeline released");
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens the highest-priority available encoder element for a codec
#[derive(Debug, Default, Clone, Copy)]
pub struct GstEncoderFactory;

impl EncoderFactory for GstEncoderFactory {
    fn open(
        &self,
        codec: VideoCodec,
        settings: &EncoderSettings,
    ) -> Result<Box<dyn HardwareEncoder>, String> {
        let mut last_error = format!("No {} encoder element installed", codec);

        for info in encoders_for(codec) {
            if !is_element_available(info.element_name) {
                continue;
            }
            match GstEncoder::new(info, settings) {
                Ok(encoder) => return Ok(Box::new(encoder)),
                Err(e) => {
                    warn!(encoder = info.element_name, error = %e, "Encoder failed to start");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn available_codecs(&self) -> Vec<VideoCodec> {
        [VideoCodec::HEVC, VideoCodec::H264]
            .into_iter()
            .filter(|&codec| encoders_for(codec).any(|e| is_element_available(e.element_name)))
            .collect()
    }
}
