// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use labcam::constants::{BitratePreset, format_bitrate, timing};

#[test]
fn test_presets_increase_at_every_resolution() {
    for (w, h) in [(640, 480), (1280, 720), (1920, 1080), (3840, 2160)] {
        let rates: Vec<u32> = BitratePreset::ALL.iter().map(|p| p.bitrate_kbps(w, h)).collect();
        assert!(rates.windows(2).all(|r| r[0] < r[1]), "{w}x{h}: {rates:?}");
    }
}

#[test]
fn test_medium_grows_with_resolution() {
    let rates: Vec<u32> = [(1280, 720), (1920, 1080), (3840, 2160)]
        .iter()
        .map(|&(w, h)| BitratePreset::Medium.bitrate_kbps(w, h))
        .collect();
    assert!(rates[0] < rates[1] && rates[1] < rates[2]);
}

#[test]
fn test_preset_names_are_distinct() {
    let names: Vec<&str> = BitratePreset::ALL.iter().map(|p| p.display_name()).collect();
    assert!(names.iter().all(|n| !n.is_empty()));
    assert_ne!(names[0], names[1]);
    assert_ne!(names[1], names[2]);
}

#[test]
fn test_portrait_uses_long_edge() {
    assert_eq!(
        BitratePreset::Medium.bitrate_kbps(720, 1280),
        BitratePreset::Medium.bitrate_kbps(1280, 720)
    );
}

#[test]
fn test_format_bitrate() {
    assert_eq!(format_bitrate(4_000), "4 Mbps");
    assert_eq!(format_bitrate(2_500), "2.5 Mbps");
}

#[test]
fn test_encoder_timeouts() {
    assert_eq!(timing::INPUT_DEQUEUE_TIMEOUT.as_millis(), 10);
    assert_eq!(timing::OUTPUT_DEQUEUE_TIMEOUT.as_millis(), 10);
    assert_eq!(timing::EOS_GRACE_PERIOD.as_millis(), 500);
}
