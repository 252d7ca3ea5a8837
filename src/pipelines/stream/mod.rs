// SPDX-License-Identifier: MPL-2.0

//! Streaming pipeline
//!
//! Encoded access units are sent one message each over a [`Transport`],
//! prefixed with a 16-byte big-endian header (timestamp, sequence, length).
//! A [`FrameRateGate`] in front of the encoder limits the stream to the
//! requested frame rate.

pub mod crop;
pub mod session;
pub mod sink;
pub mod transport;

pub use crop::{aspect_crop, stream_crop_rect};
pub use session::{StreamOutput, StreamSession, StreamSessionFactory, StreamSettings};
pub use sink::{FrameRateGate, StreamFrameHeader, StreamSink, StreamSummary, decode_message};
pub use transport::{TcpTransport, Transport, VecTransport};
