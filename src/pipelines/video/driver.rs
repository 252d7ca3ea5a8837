// SPDX-License-Identifier: MPL-2.0

//! Encoder session state machine
//!
//! [`EncoderDriver`] owns one hardware encoder instance and one access-unit
//! sink for the duration of a session. Frames are submitted one at a time
//! and every submission is followed by a drain pass that pulls finished
//! output until the encoder reports "try again later". Drained events are
//! dispatched in plain control flow: format changes and config-only buffers
//! feed the mux-start strategies, payload is written once the sink started.
//!
//! ```text
//! Unconfigured ──start──▶ ConfiguredNoMux ──mux start──▶ MuxStarted
//!       ▲                        │                            │
//!       └──────── start ◀── Stopped ◀─────── stop ────────────┘
//! ```

use super::encoder_selection::EncoderConfig;
use super::muxer::{FormatDescriptor, MUX_START_STRATEGIES, MuxContext, MuxTrigger};
use crate::backends::camera::types::PixelBuffer;
use crate::constants::timing::{EOS_GRACE_PERIOD, INPUT_DEQUEUE_TIMEOUT, OUTPUT_DEQUEUE_TIMEOUT};
use crate::errors::RecordingError;
use crate::media::encoders::backend::{AccessUnit, EncoderFactory, HardwareEncoder, OutputEvent};
use crate::media::encoders::video::VideoCodec;
use crate::media::formats::codec;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a session is in its mux lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MuxState {
    /// No session
    #[default]
    Unconfigured,
    /// Encoder configured, sink not yet accepting samples
    ConfiguredNoMux,
    /// Sink registered its track and accepts samples
    MuxStarted,
    /// Session stopped; `start` may begin a new one
    Stopped,
}

/// Consumer of encoded access units
///
/// Implemented by the MP4 container and by the stream sink.
pub trait AccessUnitSink {
    type Output;

    /// Try to begin accepting samples; `false` means "not yet"
    fn try_start(&mut self, format: &FormatDescriptor) -> bool;

    fn is_started(&self) -> bool;

    /// Write one access unit; `false` if it was not accepted
    fn write_sample(&mut self, unit: &AccessUnit, keyframe: bool) -> bool;

    /// Close the sink; must tolerate being called more than once
    fn finalize(&mut self) -> Self::Output;
}

/// Parameters of the running session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncoderSession {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub fps: u32,
    pub frame_interval_us: i64,
    /// Codec actually opened
    pub codec: VideoCodec,
    /// Whether the preferred codec was unavailable
    pub fallback_used: bool,
}

/// Per-session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EncoderStats {
    /// Frames queued into the encoder
    pub submitted: u64,
    /// Frames dropped because no input slot freed up in time
    pub dropped_no_slot: u64,
    /// Frames dropped because the slot was smaller than the frame
    pub dropped_capacity: u64,
    /// Frames the encoder refused to queue
    pub dropped_queue_failed: u64,
    /// Access units drained before the sink started
    pub dropped_unstarted: u64,
    /// Access units the started sink refused
    pub dropped_sink: u64,
    /// Config-only buffers seen
    pub config_buffers: u64,
    /// Access units written to the sink
    pub written: u64,
}

/// What happened to a submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    DroppedNoSlot,
    DroppedCapacity,
    DroppedQueueFailed,
    /// No session running
    NotRunning,
}

/// Submission result plus what the follow-up drain delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReport {
    pub outcome: SubmitOutcome,
    /// Access units written to the sink by the drain pass
    pub written: usize,
}

/// Summary returned by a successful stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: VideoCodec,
    pub fallback_used: bool,
    pub frame_count: u64,
    pub stats: EncoderStats,
}

/// Finalized sink output and session summary
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedOutput<T> {
    pub output: T,
    pub summary: SessionSummary,
}

/// Drives one encoder and one sink through a session
pub struct EncoderDriver<S: AccessUnitSink> {
    factory: Box<dyn EncoderFactory>,
    encoder: Option<Box<dyn HardwareEncoder>>,
    sink: Option<S>,
    session: Option<EncoderSession>,
    state: MuxState,
    config_cache: Option<Vec<u8>>,
    stats: EncoderStats,
    last_pts_us: Option<i64>,
    eos_seen: bool,
}

impl<S: AccessUnitSink> EncoderDriver<S> {
    pub fn new(factory: Box<dyn EncoderFactory>) -> Self {
        Self {
            factory,
            encoder: None,
            sink: None,
            session: None,
            state: MuxState::Unconfigured,
            config_cache: None,
            stats: EncoderStats::default(),
            last_pts_us: None,
            eos_seen: false,
        }
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    pub fn session(&self) -> Option<&EncoderSession> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    pub fn is_running(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    pub fn sink_mut(&mut self) -> Option<&mut S> {
        self.sink.as_mut()
    }

    /// Open an encoder and attach `sink`
    ///
    /// Codecs are tried in `config` priority order; the first that opens is
    /// kept for the whole session. Fails only if none of them can be opened.
    pub fn start(
        &mut self,
        config: &EncoderConfig,
        width: u32,
        height: u32,
        sink: S,
    ) -> Result<VideoCodec, RecordingError> {
        self.start_from(config, width, height, &mut Some(sink))
    }

    /// Like [`start`](Self::start), but `sink` is taken only once an encoder
    /// has opened; on failure it is left in place for the caller.
    pub fn start_from(
        &mut self,
        config: &EncoderConfig,
        width: u32,
        height: u32,
        sink: &mut Option<S>,
    ) -> Result<VideoCodec, RecordingError> {
        if self.encoder.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(RecordingError::StartFailed(format!(
                "Frame size {}x{} must be even and non-zero",
                width, height
            )));
        }

        let settings = config.settings(width, height);
        let codecs = config.codecs();
        let mut failures = Vec::new();
        let mut opened = None;

        for (attempt, codec) in codecs.iter().enumerate() {
            match self.factory.open(*codec, &settings) {
                Ok(encoder) => {
                    opened = Some((attempt, *codec, encoder));
                    break;
                }
                Err(e) => {
                    warn!(codec = %codec, error = %e, "Codec unavailable, trying next");
                    failures.push(format!("{}: {}", codec, e));
                }
            }
        }

        let Some((attempt, codec, mut encoder)) = opened else {
            return Err(RecordingError::EncoderNotAvailable(failures.join("; ")));
        };
        let Some(sink) = sink.take() else {
            encoder.release();
            return Err(RecordingError::StartFailed("No output sink".into()));
        };

        let session = EncoderSession {
            width,
            height,
            bitrate_bps: settings.bitrate_bps,
            fps: settings.fps,
            frame_interval_us: settings.frame_interval_us(),
            codec,
            fallback_used: attempt > 0,
        };
        info!(
            codec = %codec,
            fallback = session.fallback_used,
            width,
            height,
            bitrate_bps = settings.bitrate_bps,
            fps = settings.fps,
            "Encoder session started"
        );

        let initial = encoder.initial_format();
        self.encoder = Some(encoder);
        self.sink = Some(sink);
        self.session = Some(session);
        self.state = MuxState::ConfiguredNoMux;
        self.config_cache = None;
        self.stats = EncoderStats::default();
        self.last_pts_us = None;
        self.eos_seen = false;

        self.try_mux_start(MuxTrigger::Configured(initial.as_ref()));
        Ok(codec)
    }

    /// Queue one frame and drain whatever output is ready
    ///
    /// Never fails: frames that cannot be queued are dropped and counted.
    pub fn submit(&mut self, buffer: &PixelBuffer) -> SubmitReport {
        let Some(encoder) = self.encoder.as_mut() else {
            return SubmitReport {
                outcome: SubmitOutcome::NotRunning,
                written: 0,
            };
        };

        // Timestamps never run backwards within a session
        let pts_us = match self.last_pts_us {
            Some(last) => buffer.timestamp_us.max(last),
            None => buffer.timestamp_us,
        };

        let outcome = match encoder.dequeue_input(INPUT_DEQUEUE_TIMEOUT) {
            None => {
                self.stats.dropped_no_slot += 1;
                debug!(dropped = self.stats.dropped_no_slot, "No input slot, frame dropped");
                SubmitOutcome::DroppedNoSlot
            }
            Some(slot) if slot.capacity < buffer.data.len() => {
                warn!(
                    capacity = slot.capacity,
                    frame_len = buffer.data.len(),
                    "Input slot smaller than frame, frame dropped"
                );
                encoder.discard_input(slot);
                self.stats.dropped_capacity += 1;
                SubmitOutcome::DroppedCapacity
            }
            Some(slot) => match encoder.queue_input(slot, &buffer.data, pts_us) {
                Ok(()) => {
                    self.stats.submitted += 1;
                    self.last_pts_us = Some(pts_us);
                    SubmitOutcome::Queued
                }
                Err(e) => {
                    warn!(error = %e, "Encoder rejected frame");
                    self.stats.dropped_queue_failed += 1;
                    SubmitOutcome::DroppedQueueFailed
                }
            },
        };

        let written = self.drain().len();
        SubmitReport { outcome, written }
    }

    /// Pull output until "try again later" and dispatch it
    ///
    /// Returns the access units the sink accepted, in order.
    pub fn drain(&mut self) -> Vec<AccessUnit> {
        let events = self.pull_output();
        let mut delivered = Vec::new();
        for event in events {
            if let Some(unit) = self.dispatch(event) {
                delivered.push(unit);
            }
        }
        delivered
    }

    fn pull_output(&mut self) -> Vec<OutputEvent> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        loop {
            match encoder.dequeue_output(OUTPUT_DEQUEUE_TIMEOUT) {
                OutputEvent::TryAgainLater => break,
                OutputEvent::Buffer(unit) if unit.flags.end_of_stream => {
                    events.push(OutputEvent::Buffer(unit));
                    break;
                }
                event => events.push(event),
            }
        }
        events
    }

    /// Handle one output event; returns the unit if the sink took it
    fn dispatch(&mut self, event: OutputEvent) -> Option<AccessUnit> {
        match event {
            OutputEvent::TryAgainLater => None,
            OutputEvent::FormatChanged(format) => {
                info!(
                    codec = %format.codec,
                    width = format.width,
                    height = format.height,
                    csd_buffers = format.csd.len(),
                    "Encoder output format changed"
                );
                self.try_mux_start(MuxTrigger::FormatChanged(&format));
                None
            }
            OutputEvent::Buffer(unit) => self.dispatch_buffer(unit),
        }
    }

    fn dispatch_buffer(&mut self, unit: AccessUnit) -> Option<AccessUnit> {
        if unit.flags.end_of_stream {
            self.eos_seen = true;
            debug!("Encoder reached end of stream");
            if unit.data.is_empty() {
                return None;
            }
        }

        let session = self.session.as_ref()?;
        let codec = session.codec;

        if unit.is_config_only() {
            self.stats.config_buffers += 1;
            if !self.sink_started() {
                debug!(len = unit.data.len(), "Config-only buffer cached");
                self.config_cache = Some(unit.data.clone());
                self.try_mux_start(MuxTrigger::ConfigOnly(&unit.data));
            }
            return None;
        }

        let keyframe = codec::is_keyframe(codec, &unit.data, unit.flags.keyframe);
        if !self.sink_started() && keyframe {
            self.try_mux_start(MuxTrigger::Keyframe(&unit.data));
        }

        let sink = self.sink.as_mut()?;
        if !sink.is_started() {
            self.stats.dropped_unstarted += 1;
            debug!(
                dropped = self.stats.dropped_unstarted,
                keyframe, "Access unit before mux start dropped"
            );
            return None;
        }
        if sink.write_sample(&unit, keyframe) {
            self.stats.written += 1;
            Some(unit)
        } else {
            self.stats.dropped_sink += 1;
            debug!(dropped = self.stats.dropped_sink, keyframe, "Access unit refused by sink");
            None
        }
    }

    fn sink_started(&self) -> bool {
        self.sink.as_ref().is_some_and(|s| s.is_started())
    }

    /// Evaluate the mux-start strategies for `trigger`
    fn try_mux_start(&mut self, trigger: MuxTrigger<'_>) {
        let Self {
            sink,
            session,
            config_cache,
            state,
            ..
        } = self;
        let (Some(sink), Some(session)) = (sink.as_mut(), session.as_ref()) else {
            return;
        };
        if sink.is_started() {
            return;
        }

        let ctx = MuxContext {
            codec: session.codec,
            width: session.width,
            height: session.height,
            cached_config: config_cache.as_deref(),
        };

        for strategy in MUX_START_STRATEGIES {
            let Some(descriptor) = strategy.descriptor(&trigger, &ctx) else {
                continue;
            };
            if sink.try_start(&descriptor) {
                *state = MuxState::MuxStarted;
                info!(strategy = strategy.name(), forced = descriptor.forced, "Mux started");
                return;
            }
        }
    }

    /// End the session
    ///
    /// Signals end of stream, drains for a bounded grace period, finalizes the
    /// sink and releases the encoder. The driver is reusable afterwards. Safe
    /// to call in any state; without a session it reports `NotRecording`.
    pub fn stop(&mut self) -> Result<EncodedOutput<S::Output>, RecordingError> {
        if self.encoder.is_none() && self.sink.is_none() {
            return Err(RecordingError::NotRecording);
        }

        if let Some(encoder) = self.encoder.as_mut()
            && let Err(e) = encoder.signal_end_of_stream()
        {
            warn!(error = %e, "Failed to signal end of stream");
        }

        let deadline = Instant::now() + EOS_GRACE_PERIOD;
        while !self.eos_seen && Instant::now() < deadline {
            let Some(encoder) = self.encoder.as_mut() else {
                break;
            };
            let event = encoder.dequeue_output(OUTPUT_DEQUEUE_TIMEOUT);
            if !matches!(event, OutputEvent::TryAgainLater) {
                self.dispatch(event);
            }
        }
        if !self.eos_seen {
            debug!("End of stream not reached within grace period");
        }

        let output = self.sink.as_mut().map(|sink| sink.finalize());
        if let Some(mut encoder) = self.encoder.take() {
            encoder.release();
        }

        let stats = self.stats;
        let session = self.session.take();
        self.sink = None;
        self.config_cache = None;
        self.last_pts_us = None;
        self.eos_seen = false;
        self.stats = EncoderStats::default();
        self.state = MuxState::Stopped;

        info!(
            written = stats.written,
            submitted = stats.submitted,
            dropped_no_slot = stats.dropped_no_slot,
            dropped_capacity = stats.dropped_capacity,
            dropped_unstarted = stats.dropped_unstarted,
            dropped_sink = stats.dropped_sink,
            "Encoder session stopped"
        );

        let (Some(output), Some(session)) = (output, session) else {
            return Err(RecordingError::NotRecording);
        };
        if stats.written == 0 {
            return Err(RecordingError::NoSamples);
        }

        Ok(EncodedOutput {
            output,
            summary: SessionSummary {
                width: session.width,
                height: session.height,
                fps: session.fps,
                codec: session.codec,
                fallback_used: session.fallback_used,
                frame_count: stats.written,
                stats,
            },
        })
    }
}

impl<S: AccessUnitSink> Drop for EncoderDriver<S> {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            debug!("Releasing encoder of dropped driver");
            encoder.release();
        }
    }
}
