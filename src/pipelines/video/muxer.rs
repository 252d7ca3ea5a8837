// SPDX-License-Identifier: MPL-2.0

//! Container muxing and the mux-start policy
//!
//! A container can only accept samples once it knows the codec
//! configuration. Encoders surface that configuration through different
//! channels, so starting the mux is tried from several triggers and resolved
//! by an ordered table of [`MuxStartStrategy`] values:
//!
//! 1. the format the encoder advertises right after configuration
//! 2. a format-changed event from the output queue
//! 3. a config-only buffer (or one cached earlier)
//! 4. as a last resort, the first keyframe, even without parameter sets

use super::driver::AccessUnitSink;
use super::mp4::{Mp4Error, Mp4Writer};
use crate::media::encoders::backend::{AccessUnit, EncoderFormat};
use crate::media::encoders::video::VideoCodec;
use crate::media::formats::codec::{self, ParameterSets};
use tracing::{debug, info, warn};

/// What the container needs to know to register the video track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub parameter_sets: ParameterSets,
    /// Started without a configuration record; output may be non-conformant
    pub forced: bool,
}

impl FormatDescriptor {
    /// Descriptor from an encoder-advertised format
    pub fn from_encoder_format(format: &EncoderFormat) -> Self {
        Self {
            codec: format.codec,
            width: format.width,
            height: format.height,
            parameter_sets: codec::extract_from_buffers(format.codec, &format.csd),
            forced: false,
        }
    }

    /// Descriptor synthesized from raw configuration bytes
    pub fn from_config_bytes(codec: VideoCodec, width: u32, height: u32, bytes: &[u8]) -> Self {
        Self {
            codec,
            width,
            height,
            parameter_sets: codec::extract_parameter_sets(codec, bytes),
            forced: false,
        }
    }

    pub fn has_config(&self) -> bool {
        self.parameter_sets.has_sps()
    }
}

/// Event that gives the driver a chance to start the mux
#[derive(Debug, Clone, Copy)]
pub enum MuxTrigger<'a> {
    /// Encoder was just configured; carries its initial format if any
    Configured(Option<&'a EncoderFormat>),
    /// Output queue reported a new format
    FormatChanged(&'a EncoderFormat),
    /// A buffer flagged as codec configuration arrived
    ConfigOnly(&'a [u8]),
    /// A keyframe arrived while the mux was not started
    Keyframe(&'a [u8]),
}

/// Session facts every strategy may draw on
#[derive(Debug, Clone, Copy)]
pub struct MuxContext<'a> {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Config-only bytes cached from an earlier buffer
    pub cached_config: Option<&'a [u8]>,
}

/// One way of obtaining a format descriptor to start the mux with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuxStartStrategy {
    AdvertisedFormat,
    FormatChanged,
    ConfigRecord,
    ForcedKeyframe,
}

/// Strategies in evaluation order
pub const MUX_START_STRATEGIES: [MuxStartStrategy; 4] = [
    MuxStartStrategy::AdvertisedFormat,
    MuxStartStrategy::FormatChanged,
    MuxStartStrategy::ConfigRecord,
    MuxStartStrategy::ForcedKeyframe,
];

impl MuxStartStrategy {
    /// Descriptor this strategy produces for `trigger`, if it applies
    pub fn descriptor(
        &self,
        trigger: &MuxTrigger<'_>,
        ctx: &MuxContext<'_>,
    ) -> Option<FormatDescriptor> {
        let descriptor = match (self, trigger) {
            (MuxStartStrategy::AdvertisedFormat, MuxTrigger::Configured(Some(format)))
            | (MuxStartStrategy::FormatChanged, MuxTrigger::FormatChanged(format)) => {
                FormatDescriptor::from_encoder_format(format)
            }
            (MuxStartStrategy::ConfigRecord, MuxTrigger::ConfigOnly(bytes)) => {
                FormatDescriptor::from_config_bytes(ctx.codec, ctx.width, ctx.height, bytes)
            }
            (MuxStartStrategy::ConfigRecord, _) => {
                let bytes = ctx.cached_config?;
                FormatDescriptor::from_config_bytes(ctx.codec, ctx.width, ctx.height, bytes)
            }
            (MuxStartStrategy::ForcedKeyframe, MuxTrigger::Keyframe(bytes)) => {
                return Some(FormatDescriptor {
                    codec: ctx.codec,
                    width: ctx.width,
                    height: ctx.height,
                    parameter_sets: codec::extract_parameter_sets(ctx.codec, bytes),
                    forced: true,
                });
            }
            _ => return None,
        };

        descriptor.has_config().then_some(descriptor)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MuxStartStrategy::AdvertisedFormat => "advertised-format",
            MuxStartStrategy::FormatChanged => "format-changed",
            MuxStartStrategy::ConfigRecord => "config-record",
            MuxStartStrategy::ForcedKeyframe => "forced-keyframe",
        }
    }
}

/// First strategy in table order that yields a descriptor for `trigger`
pub fn resolve_start(
    trigger: &MuxTrigger<'_>,
    ctx: &MuxContext<'_>,
) -> Option<(MuxStartStrategy, FormatDescriptor)> {
    MUX_START_STRATEGIES
        .iter()
        .find_map(|strategy| strategy.descriptor(trigger, ctx).map(|d| (*strategy, d)))
}

/// MP4 container sink
#[derive(Debug)]
pub struct ContainerMuxer {
    frame_interval_us: i64,
    writer: Option<Mp4Writer>,
    frame_count: u64,
    discarded: u64,
    forced: bool,
    finalized: Option<Vec<u8>>,
}

impl ContainerMuxer {
    pub fn new(frame_interval_us: i64) -> Self {
        Self {
            frame_interval_us,
            writer: None,
            frame_count: 0,
            discarded: 0,
            forced: false,
            finalized: None,
        }
    }

    /// Register the video track
    ///
    /// No-op if already started. Returns `false` without error when the
    /// descriptor carries no SPS and is not forced, so the caller can retry
    /// from another trigger.
    pub fn try_start(&mut self, format: &FormatDescriptor) -> bool {
        if self.writer.is_some() {
            return true;
        }
        if self.finalized.is_some() {
            debug!("Muxer already finalized, ignoring start");
            return false;
        }
        if !format.has_config() && !format.forced {
            debug!(codec = %format.codec, "No configuration record yet, mux start deferred");
            return false;
        }

        if format.forced && !format.has_config() {
            warn!(
                codec = %format.codec,
                "Starting mux without configuration record, output may not be conformant"
            );
        }

        self.forced = format.forced;
        self.writer = Some(Mp4Writer::new(
            format.codec,
            format.width,
            format.height,
            self.frame_interval_us,
            format.parameter_sets.clone(),
        ));

        info!(
            codec = %format.codec,
            width = format.width,
            height = format.height,
            "Container track registered"
        );
        true
    }

    pub fn is_started(&self) -> bool {
        self.writer.is_some()
    }

    /// Mux was started without a configuration record
    pub fn was_forced(&self) -> bool {
        self.forced
    }

    /// Append a sample; discarded and counted separately unless started
    pub fn write_sample(&mut self, payload: &[u8], pts_us: i64, keyframe: bool) -> bool {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.write_sample(payload, pts_us, keyframe);
                self.frame_count += 1;
                true
            }
            None => {
                self.discarded += 1;
                debug!(discarded = self.discarded, "Sample before mux start discarded");
                false
            }
        }
    }

    /// Samples accepted into the container
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Samples discarded because the mux was not started
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Close the container and return its bytes
    ///
    /// Idempotent: later calls return the same bytes. A container that was
    /// never started yields no bytes. If the index cannot be written the
    /// unindexed payload is returned instead.
    pub fn finalize(&mut self) -> Vec<u8> {
        if let Some(bytes) = &self.finalized {
            return bytes.clone();
        }

        let bytes = match self.writer.take() {
            None => Vec::new(),
            Some(writer) => match writer.finish() {
                Ok(bytes) => bytes,
                Err(Mp4Error::NoSamples) => Vec::new(),
                Err(e) => {
                    warn!(error = %e, "Container index could not be written, keeping unindexed payload");
                    writer.unindexed()
                }
            },
        };

        self.finalized = Some(bytes.clone());
        bytes
    }
}

impl AccessUnitSink for ContainerMuxer {
    type Output = Vec<u8>;

    fn try_start(&mut self, format: &FormatDescriptor) -> bool {
        ContainerMuxer::try_start(self, format)
    }

    fn is_started(&self) -> bool {
        ContainerMuxer::is_started(self)
    }

    fn write_sample(&mut self, unit: &AccessUnit, keyframe: bool) -> bool {
        ContainerMuxer::write_sample(self, &unit.data, unit.pts_us, keyframe)
    }

    fn finalize(&mut self) -> Vec<u8> {
        ContainerMuxer::finalize(self)
    }
}
