// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder detection
//!
//! This module checks which of the catalogued encoder elements are present in
//! the GStreamer installation.

use super::video::{EncoderInfo, encoder_catalogue};
use gstreamer as gst;
use tracing::{debug, info};

/// Check if a specific GStreamer element is available
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().ok();
    gst::ElementFactory::find(element_name).is_some()
}

/// Detect all available video encoders
///
/// Returns the available catalogue entries sorted by priority.
pub fn detect_video_encoders() -> Vec<&'static EncoderInfo> {
    gst::init().ok();

    let mut available = Vec::new();
    for encoder in encoder_catalogue() {
        if is_element_available(encoder.element_name) {
            debug!("Video encoder available: {}", encoder.element_name);
            available.push(encoder);
        }
    }

    info!("Detected {} video encoders", available.len());
    available
}

/// Log all available encoders (for debugging)
pub fn log_available_encoders() {
    info!("=== GStreamer Encoder Detection ===");
    for encoder in detect_video_encoders() {
        info!("  ✓ {} ({})", encoder.element_name, encoder.display_name);
    }
}
