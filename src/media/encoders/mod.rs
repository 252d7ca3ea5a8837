// SPDX-License-Identifier: MPL-2.0

//! Video encoder selection and the encoder buffer-exchange interface
//!
//! - [`video`]: codec identity, priority parsing and the encoder catalogue
//! - [`backend`]: the slot/queue/drain protocol every encoder implements
//! - `gst_backend` / `detection`: GStreamer implementation (feature `gstreamer`)

pub mod backend;
#[cfg(feature = "gstreamer")]
pub mod detection;
#[cfg(feature = "gstreamer")]
pub mod gst_backend;
pub mod video;

// Re-export commonly used types
pub use backend::{
    AccessUnit, AccessUnitFlags, EncoderFactory, EncoderFormat, EncoderSettings,
    HardwareEncoder, InputSlot, OutputEvent,
};
#[cfg(feature = "gstreamer")]
pub use detection::log_available_encoders;
#[cfg(feature = "gstreamer")]
pub use gst_backend::GstEncoderFactory;
pub use video::{VideoCodec, parse_codec_priority};
