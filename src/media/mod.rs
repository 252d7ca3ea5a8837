// SPDX-License-Identifier: MPL-2.0

//! Media processing for the frame pipeline
//!
//! # Color Space Conversion
//!
//! Camera frames arrive as three planes with arbitrary row and pixel strides.
//! The [`nv12_converter`] module crops, rotates and repacks them into the
//! tightly packed 4:2:0 layout the encoder was configured with.
//!
//! # Watermark
//!
//! [`watermark`] burns a `Time: HH:MM:SS` label into the luma plane using the
//! built-in stroke font from [`glyphs`].
//!
//! # Video Encoding
//!
//! The [`encoders`] module defines the encoder buffer-exchange protocol and
//! its GStreamer implementation; [`formats`] parses and builds the H.26x
//! bitstream structures the container needs.

pub mod encoders;
pub mod formats;
pub mod glyphs;
pub mod nv12_converter;
pub mod watermark;

// Re-export commonly used types
pub use nv12_converter::ColorConverter;
pub use watermark::WatermarkRenderer;
