// SPDX-License-Identifier: MPL-2.0

//! Capture-side abstractions
//!
//! Real sensors are external collaborators; the pipeline only sees the frame
//! types defined in [`camera::types`] and the [`camera::FrameSource`] trait.

pub mod camera;
