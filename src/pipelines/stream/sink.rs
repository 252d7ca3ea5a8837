// SPDX-License-Identifier: MPL-2.0

//! Streaming sink and wire framing
//!
//! Every encoded access unit goes out as one message:
//!
//! ```text
//! ┌──────────────────┬─────────────┬─────────────┬──────────────┐
//! │ timestamp ms i64 │ sequence u32│ length u32  │ payload ...  │
//! └──────────────────┴─────────────┴─────────────┴──────────────┘
//!          8                4             4        (big-endian)
//! ```

use super::transport::Transport;
use crate::constants::stream::HEADER_LEN;
use crate::errors::StreamError;
use crate::media::encoders::backend::AccessUnit;
use crate::media::encoders::video::VideoCodec;
use crate::media::formats::codec::{self, ParameterSets};
use crate::pipelines::video::{AccessUnitSink, FormatDescriptor};
use serde::Serialize;
use tracing::{debug, info, warn};

const NANOS_PER_SECOND: u64 = 1_000_000_000;
const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Fixed 16-byte header preceding every streamed access unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFrameHeader {
    pub timestamp_ms: i64,
    pub sequence: u32,
    pub length: u32,
}

impl StreamFrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..8].copy_from_slice(&self.timestamp_ms.to_be_bytes());
        out[8..12].copy_from_slice(&self.sequence.to_be_bytes());
        out[12..16].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StreamError> {
        let header: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                StreamError::Protocol(format!("Frame header needs {} bytes", HEADER_LEN))
            })?;

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&header[0..8]);
        let mut seq = [0u8; 4];
        seq.copy_from_slice(&header[8..12]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&header[12..16]);

        Ok(Self {
            timestamp_ms: i64::from_be_bytes(ts),
            sequence: u32::from_be_bytes(seq),
            length: u32::from_be_bytes(len),
        })
    }
}

/// Split one wire message into header and payload
pub fn decode_message(message: &[u8]) -> Result<(StreamFrameHeader, &[u8]), StreamError> {
    let header = StreamFrameHeader::decode(message)?;
    let payload = &message[HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(StreamError::Protocol(format!(
            "Payload length {} does not match header length {}",
            payload.len(),
            header.length
        )));
    }
    Ok((header, payload))
}

/// Minimum-interval gate in front of the encoder
#[derive(Debug, Clone, Default)]
pub struct FrameRateGate {
    last_sent_ns: Option<u64>,
}

impl FrameRateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame at `now_ns` should be sent at `target_fps`
    ///
    /// Zero means unlimited. Otherwise a frame passes once `1e9 / fps`
    /// nanoseconds have elapsed since the last accepted one.
    pub fn should_send(&mut self, target_fps: u32, now_ns: u64) -> bool {
        if target_fps == 0 {
            return true;
        }
        let min_interval_ns = NANOS_PER_SECOND / target_fps as u64;
        let due = match self.last_sent_ns {
            None => true,
            Some(last) => now_ns.saturating_sub(last) >= min_interval_ns,
        };
        if due {
            self.last_sent_ns = Some(now_ns);
        }
        due
    }

    pub fn reset(&mut self) {
        self.last_sent_ns = None;
    }
}

/// Counters reported when a stream ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    /// Messages handed to the transport successfully
    pub sent: u64,
    /// Frames rejected by the rate gate
    pub gated: u64,
    /// Messages the transport refused
    pub send_failures: u64,
    /// Payload plus header bytes sent
    pub bytes_sent: u64,
    /// Sequence number the next message would carry
    pub next_sequence: u32,
}

/// Frames access units onto a [`Transport`]
pub struct StreamSink<T: Transport> {
    transport: T,
    gate: FrameRateGate,
    sequence: u32,
    parameter_sets: Option<(VideoCodec, ParameterSets)>,
    started: bool,
    closed: bool,
    summary: StreamSummary,
}

impl<T: Transport> StreamSink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            gate: FrameRateGate::new(),
            sequence: 0,
            parameter_sets: None,
            started: false,
            closed: false,
            summary: StreamSummary::default(),
        }
    }

    /// Start numbering at `sequence` instead of zero
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Rate gate with counting; see [`FrameRateGate::should_send`]
    pub fn should_send(&mut self, target_fps: u32, now_ns: u64) -> bool {
        let accepted = self.gate.should_send(target_fps, now_ns);
        if !accepted {
            self.summary.gated += 1;
        }
        accepted
    }

    /// Send `payload` with a header carrying `timestamp_ms`
    ///
    /// The sequence number advances whether or not the transport accepts
    /// the message.
    pub fn frame(&mut self, payload: &[u8], timestamp_ms: i64) -> Result<(), StreamError> {
        let header = StreamFrameHeader {
            timestamp_ms,
            sequence: self.sequence,
            length: payload.len() as u32,
        };
        self.sequence = self.sequence.wrapping_add(1);

        let mut message = Vec::with_capacity(HEADER_LEN + payload.len());
        message.extend_from_slice(&header.encode());
        message.extend_from_slice(payload);
        let len = message.len() as u64;

        match self.transport.send(message) {
            Ok(()) => {
                self.summary.sent += 1;
                self.summary.bytes_sent += len;
                Ok(())
            }
            Err(e) => {
                self.summary.send_failures += 1;
                if e == StreamError::Closed {
                    self.closed = true;
                }
                Err(e)
            }
        }
    }

    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    pub fn gated(&self) -> u64 {
        self.summary.gated
    }

    pub fn sent(&self) -> u64 {
        self.summary.sent
    }

    /// The transport reported that it is gone for good
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Close the transport without finalizing a started stream
    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            next_sequence: self.sequence,
            ..self.summary
        }
    }

    /// Prefix a keyframe with the cached parameter sets if it carries none
    fn with_parameter_sets(&self, unit: &AccessUnit, keyframe: bool) -> Option<Vec<u8>> {
        let (stream_codec, sets) = self.parameter_sets.as_ref()?;
        if !keyframe || codec::split_annex_b(&unit.data).is_empty() {
            return None;
        }
        let in_band = codec::extract_parameter_sets(*stream_codec, &unit.data);
        if in_band.has_sps() {
            return None;
        }

        let mut out = Vec::with_capacity(unit.data.len() + 64);
        for nal in sets.vps.iter().chain(&sets.sps).chain(&sets.pps) {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nal);
        }
        out.extend_from_slice(&unit.data);
        Some(out)
    }
}

impl<T: Transport> AccessUnitSink for StreamSink<T> {
    type Output = StreamSummary;

    /// A stream needs no container; it starts on the first trigger and
    /// keeps whatever parameter sets came with it
    fn try_start(&mut self, format: &FormatDescriptor) -> bool {
        if format.has_config() {
            self.parameter_sets = Some((format.codec, format.parameter_sets.clone()));
        }
        if !self.started {
            info!(
                codec = %format.codec,
                width = format.width,
                height = format.height,
                forced = format.forced,
                "Stream started"
            );
        }
        self.started = true;
        true
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn write_sample(&mut self, unit: &AccessUnit, keyframe: bool) -> bool {
        let timestamp_ms = unit.pts_us.div_euclid(1000);
        let result = match self.with_parameter_sets(unit, keyframe) {
            Some(payload) => self.frame(&payload, timestamp_ms),
            None => self.frame(&unit.data, timestamp_ms),
        };
        if let Err(e) = &result {
            debug!(error = %e, sequence = self.sequence.wrapping_sub(1), "Stream message not sent");
        }
        result.is_ok()
    }

    fn finalize(&mut self) -> StreamSummary {
        if self.started {
            self.close();
            self.started = false;
            let summary = self.summary();
            if summary.send_failures > 0 {
                warn!(failures = summary.send_failures, "Stream ended with failed sends");
            }
            info!(sent = summary.sent, gated = summary.gated, "Stream finished");
        }
        self.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::stream::transport::VecTransport;

    #[test]
    fn test_header_layout_is_big_endian() {
        let header = StreamFrameHeader {
            timestamp_ms: 0x0102_0304_0506_0708,
            sequence: 0x0A0B_0C0D,
            length: 3,
        };
        assert_eq!(
            header.encode(),
            [1, 2, 3, 4, 5, 6, 7, 8, 0x0A, 0x0B, 0x0C, 0x0D, 0, 0, 0, 3]
        );
        assert_eq!(StreamFrameHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_short_header_is_rejected() {
        assert!(StreamFrameHeader::decode(&[0u8; 15]).is_err());
    }

    #[test]
    fn test_gate_every_other_tick_at_10fps() {
        let mut gate = FrameRateGate::new();
        let accepted: Vec<bool> = (0..6)
            .map(|tick| gate.should_send(10, tick * 50_000_000))
            .collect();
        assert_eq!(accepted, vec![true, false, true, false, true, false]);
    }

    #[test]
    fn test_zero_fps_is_unlimited() {
        let mut gate = FrameRateGate::new();
        assert!((0..5).all(|_| gate.should_send(0, 0)));
    }

    #[test]
    fn test_sequence_advances_on_failed_send() {
        let mut sink = StreamSink::new(VecTransport::rejecting());
        assert!(sink.frame(b"abc", 1).is_err());
        assert!(sink.frame(b"abc", 2).is_err());
        assert_eq!(sink.next_sequence(), 2);
        assert_eq!(sink.summary().send_failures, 2);
    }

    fn h264_descriptor() -> FormatDescriptor {
        FormatDescriptor {
            codec: VideoCodec::H264,
            width: 64,
            height: 64,
            parameter_sets: ParameterSets {
                vps: Vec::new(),
                sps: vec![vec![0x67, 0x42]],
                pps: vec![vec![0x68, 0xCE]],
            },
            forced: false,
        }
    }

    fn idr_unit() -> AccessUnit {
        use crate::media::encoders::backend::AccessUnitFlags;

        AccessUnit::new(
            vec![0, 0, 0, 1, 0x65, 0x88],
            0,
            AccessUnitFlags {
                keyframe: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_refused_send_is_not_a_written_sample() {
        let mut sink = StreamSink::new(VecTransport::rejecting());
        assert!(sink.try_start(&h264_descriptor()));
        assert!(!sink.write_sample(&idr_unit(), true));
        assert_eq!(sink.sent(), 0);
    }

    #[test]
    fn test_keyframe_gets_cached_parameter_sets() {
        let mut sink = StreamSink::new(VecTransport::new());
        assert!(sink.try_start(&h264_descriptor()));
        assert!(sink.write_sample(&idr_unit(), true));

        let (_, payload) = decode_message(&sink.transport().messages()[0]).unwrap();
        assert_eq!(
            payload,
            &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1, 0x65, 0x88]
        );
    }
}
