// SPDX-License-Identifier: MPL-2.0

//! Bitstream format utilities
//!
//! NAL unit splitting, parameter-set extraction and MP4 codec configuration
//! records for H.264 and H.265.

pub mod codec;

pub use codec::{ParameterSets, extract_parameter_sets, is_keyframe};
