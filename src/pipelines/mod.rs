// SPDX-License-Identifier: MPL-2.0

//! Frame processing pipelines
//!
//! Both pipelines run synchronously on the frame-processing thread: a frame
//! is converted, watermarked and submitted to the encoder, and whatever the
//! encoder has finished is drained into the sink before the next frame.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Camera Frame │ ──▶ │  Video Pipeline   │ ──▶ │   MP4 File   │
//! │  (Y/U/V)     │     │  - Crop/rotate    │     │  + metadata  │
//! │              │     │  - Watermark      │     │              │
//! │              │     │  - HW Encoding    │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Camera Frame │ ──▶ │ Stream Pipeline   │ ──▶ │  Transport   │
//! │  (Y/U/V)     │     │  - Rate gate      │     │  (16-byte    │
//! │              │     │  - Same encode    │     │   header +   │
//! │              │     │    path           │     │   AU bytes)  │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`video`]: Encoder driver, MP4 muxing and the recording session
//! - [`stream`]: Frame-rate gate, wire framing and streaming transports

pub mod stream;
pub mod video;
