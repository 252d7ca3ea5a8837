// SPDX-License-Identifier: MPL-2.0

//! Encoder driver, mux start and recorder behavior against a scripted encoder

mod common;

use common::{ConfigDelivery, Script, ScriptedFactory, find_box, gradient_frame, pixel_buffer};
use labcam::RecordingError;
use labcam::backends::camera::SensorRotation;
use labcam::media::encoders::VideoCodec;
use labcam::pipelines::video::{
    ContainerMuxer, EncoderConfig, EncoderDriver, FrameOutcome, MuxState, RecorderSettings,
    SubmitOutcome, VideoRecorder,
};
use std::time::Duration;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const FRAME_US: i64 = 100_000;

fn h264_config() -> EncoderConfig {
    EncoderConfig {
        codec_priority: vec![VideoCodec::H264],
        fps: 10,
        ..Default::default()
    }
}

fn start_driver(script: Script) -> (EncoderDriver<ContainerMuxer>, ScriptedFactory) {
    let factory = ScriptedFactory::new(script);
    let mut driver = EncoderDriver::new(factory.boxed());
    driver
        .start(&h264_config(), WIDTH, HEIGHT, ContainerMuxer::new(FRAME_US))
        .unwrap();
    (driver, factory)
}

fn submit_frames(driver: &mut EncoderDriver<ContainerMuxer>, count: usize) {
    for i in 0..count {
        driver.submit(&pixel_buffer(WIDTH, HEIGHT, 16, i as i64 * FRAME_US));
    }
}

#[test]
fn test_stop_right_after_start_has_no_samples() {
    let (mut driver, factory) = start_driver(Script::default());
    assert_eq!(driver.stop(), Err(RecordingError::NoSamples));

    let log = factory.log();
    let log = log.lock().unwrap();
    assert!(log.eos_signalled);
    assert_eq!(log.released, 1);
    assert_eq!(driver.state(), MuxState::Stopped);
}

#[test]
fn test_stop_without_session() {
    let factory = ScriptedFactory::new(Script::default());
    let mut driver: EncoderDriver<ContainerMuxer> = EncoderDriver::new(factory.boxed());
    assert_eq!(driver.stop(), Err(RecordingError::NotRecording));
    assert_eq!(driver.state(), MuxState::Unconfigured);
}

#[test]
fn test_advertised_format_starts_mux_immediately() {
    let (mut driver, _) = start_driver(Script::with_config(ConfigDelivery::Advertised));
    assert_eq!(driver.state(), MuxState::MuxStarted);

    submit_frames(&mut driver, 5);
    let output = driver.stop().unwrap();
    assert_eq!(output.summary.frame_count, 5);
    assert_eq!(output.summary.stats.dropped_unstarted, 0);
    assert_eq!(find_box(&output.output, b"ftyp"), Some(0));
    assert!(find_box(&output.output, b"avcC").is_some());
}

#[test]
fn test_format_changed_starts_mux_on_first_drain() {
    let (mut driver, _) = start_driver(Script::with_config(ConfigDelivery::FormatChanged));
    assert_eq!(driver.state(), MuxState::ConfiguredNoMux);

    let report = driver.submit(&pixel_buffer(WIDTH, HEIGHT, 16, 0));
    assert_eq!(report.outcome, SubmitOutcome::Queued);
    assert_eq!(report.written, 1);
    assert_eq!(driver.state(), MuxState::MuxStarted);
    assert!(!driver.sink().unwrap().was_forced());
}

#[test]
fn test_config_only_buffer_starts_mux() {
    let (mut driver, _) = start_driver(Script::with_config(ConfigDelivery::ConfigBuffer));
    assert_eq!(driver.state(), MuxState::ConfiguredNoMux);

    submit_frames(&mut driver, 3);
    assert_eq!(driver.state(), MuxState::MuxStarted);

    let stats = driver.stats();
    assert_eq!(stats.config_buffers, 1);
    assert_eq!(stats.written, 3);
    assert!(!driver.sink().unwrap().was_forced());
}

#[test]
fn test_keyframe_forces_mux_when_configuration_never_arrives() {
    let script = Script {
        config: ConfigDelivery::Missing,
        leading_non_keyframes: 2,
        ..Default::default()
    };
    let (mut driver, _) = start_driver(script);

    submit_frames(&mut driver, 2);
    assert_eq!(driver.state(), MuxState::ConfiguredNoMux);
    assert_eq!(driver.stats().dropped_unstarted, 2);

    submit_frames(&mut driver, 1);
    assert_eq!(driver.state(), MuxState::MuxStarted);
    assert!(driver.sink().unwrap().was_forced());

    let output = driver.stop().unwrap();
    assert_eq!(output.summary.frame_count, 1);
    assert_eq!(find_box(&output.output, b"ftyp"), Some(0));
}

#[test]
fn test_in_band_parameter_sets_feed_the_track() {
    let (mut driver, _) = start_driver(Script::with_config(ConfigDelivery::InBand));
    submit_frames(&mut driver, 4);
    assert_eq!(driver.state(), MuxState::MuxStarted);

    let output = driver.stop().unwrap();
    assert_eq!(output.summary.frame_count, 4);
    assert!(find_box(&output.output, b"avcC").is_some());
}

#[test]
fn test_written_in_submission_order_with_monotonic_pts() {
    let (mut driver, factory) = start_driver(Script::default());

    // Second timestamp runs backwards and must be clamped
    let timestamps = [0, 200_000, 100_000, 300_000, 400_000];
    let mut delivered = Vec::new();
    for ts in timestamps {
        driver.submit(&pixel_buffer(WIDTH, HEIGHT, 16, ts));
        delivered.push(driver.stats().written);
    }

    let log = factory.log();
    let queued = log.lock().unwrap().queued_pts.clone();
    assert_eq!(queued, vec![0, 200_000, 200_000, 300_000, 400_000]);
    assert!(queued.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_small_input_slot_drops_frame() {
    let script = Script {
        slot_capacity: 100,
        ..Default::default()
    };
    let (mut driver, factory) = start_driver(script);

    let report = driver.submit(&pixel_buffer(WIDTH, HEIGHT, 16, 0));
    assert_eq!(report.outcome, SubmitOutcome::DroppedCapacity);
    assert_eq!(driver.stats().dropped_capacity, 1);
    assert!(factory.log().lock().unwrap().queued_pts.is_empty());
    assert_eq!(driver.stop(), Err(RecordingError::NoSamples));
}

#[test]
fn test_no_free_slot_drops_frame() {
    let script = Script {
        slots: Some(2),
        ..Default::default()
    };
    let (mut driver, _) = start_driver(script);

    submit_frames(&mut driver, 3);
    let stats = driver.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.dropped_no_slot, 1);

    let output = driver.stop().unwrap();
    assert_eq!(output.summary.frame_count, 2);
}

#[test]
fn test_fallback_codec_when_preferred_unavailable() {
    let factory = ScriptedFactory::new(Script {
        unavailable: vec![VideoCodec::HEVC],
        ..Default::default()
    });
    let mut driver = EncoderDriver::new(factory.boxed());
    let config = EncoderConfig {
        codec_priority: vec![VideoCodec::HEVC, VideoCodec::H264],
        ..h264_config()
    };

    let codec = driver
        .start(&config, WIDTH, HEIGHT, ContainerMuxer::new(FRAME_US))
        .unwrap();
    assert_eq!(codec, VideoCodec::H264);
    assert!(driver.session().unwrap().fallback_used);

    submit_frames(&mut driver, 2);
    let output = driver.stop().unwrap();
    assert!(output.summary.fallback_used);
    assert_eq!(output.summary.codec, VideoCodec::H264);
}

#[test]
fn test_hevc_session_writes_hvcc() {
    let factory = ScriptedFactory::new(Script::default());
    let mut driver = EncoderDriver::new(factory.boxed());
    let config = EncoderConfig {
        codec_priority: vec![VideoCodec::HEVC],
        ..h264_config()
    };
    driver
        .start(&config, WIDTH, HEIGHT, ContainerMuxer::new(FRAME_US))
        .unwrap();
    submit_frames(&mut driver, 3);

    let output = driver.stop().unwrap();
    assert!(!output.summary.fallback_used);
    assert!(find_box(&output.output, b"hvcC").is_some());
    assert!(find_box(&output.output, b"hvc1").is_some());
}

#[test]
fn test_no_codec_available() {
    let factory = ScriptedFactory::new(Script {
        unavailable: vec![VideoCodec::HEVC, VideoCodec::H264],
        ..Default::default()
    });
    let mut driver = EncoderDriver::new(factory.boxed());
    let config = EncoderConfig {
        codec_priority: vec![VideoCodec::HEVC, VideoCodec::H264],
        ..h264_config()
    };

    let result = driver.start(&config, WIDTH, HEIGHT, ContainerMuxer::new(FRAME_US));
    assert!(matches!(result, Err(RecordingError::EncoderNotAvailable(_))));
    assert!(!driver.is_running());
}

#[test]
fn test_start_twice_is_rejected() {
    let (mut driver, _) = start_driver(Script::default());
    let second = driver.start(&h264_config(), WIDTH, HEIGHT, ContainerMuxer::new(FRAME_US));
    assert_eq!(second, Err(RecordingError::AlreadyRecording));
}

#[test]
fn test_driver_reusable_after_stop() {
    let (mut driver, factory) = start_driver(Script::default());
    submit_frames(&mut driver, 2);
    driver.stop().unwrap();

    driver
        .start(&h264_config(), WIDTH, HEIGHT, ContainerMuxer::new(FRAME_US))
        .unwrap();
    assert_eq!(driver.stats().written, 0);
    submit_frames(&mut driver, 1);
    assert_eq!(driver.stop().unwrap().summary.frame_count, 1);
    assert_eq!(factory.log().lock().unwrap().released, 2);
}

#[test]
fn test_muxer_discards_samples_before_start() {
    let mut muxer = ContainerMuxer::new(FRAME_US);
    assert!(!muxer.write_sample(&[0, 0, 0, 1, 0x65, 0x88], 0, true));
    assert_eq!(muxer.discarded(), 1);
    assert_eq!(muxer.frame_count(), 0);
    assert!(muxer.finalize().is_empty());
}

fn recorder_settings() -> RecorderSettings {
    RecorderSettings {
        encoder: h264_config(),
        watermark: None,
        ..Default::default()
    }
}

#[test]
fn test_recorder_produces_mp4() {
    let factory = ScriptedFactory::new(Script::default());
    let mut recorder = VideoRecorder::new(recorder_settings(), factory.boxed());

    for i in 0..5 {
        let frame = gradient_frame(WIDTH, HEIGHT, i * FRAME_US);
        assert_eq!(recorder.process_frame(&frame.view()), Ok(FrameOutcome::Encoded));
    }
    assert!(recorder.is_recording());
    assert_eq!(recorder.output_size(), Some((WIDTH, HEIGHT)));

    let output = recorder.stop().unwrap();
    assert_eq!(find_box(&output.bytes, b"ftyp"), Some(0));
    assert_eq!(output.metadata.frame_count, 5);
    assert_eq!(output.metadata.codec, VideoCodec::H264);
    assert_eq!((output.metadata.width, output.metadata.height), (WIDTH, HEIGHT));
    assert!(!recorder.is_recording());
}

#[test]
fn test_recorder_rotated_session_swaps_dimensions() {
    let factory = ScriptedFactory::new(Script::default());
    let settings = RecorderSettings {
        rotation: SensorRotation::Rotate90,
        ..recorder_settings()
    };
    let mut recorder = VideoRecorder::new(settings, factory.boxed());

    let frame = gradient_frame(WIDTH, HEIGHT, 0);
    recorder.process_frame(&frame.view()).unwrap();
    assert_eq!(recorder.output_size(), Some((HEIGHT, WIDTH)));

    let log = factory.log();
    let settings = log.lock().unwrap().settings[0].clone();
    assert_eq!((settings.width, settings.height), (HEIGHT, WIDTH));
}

#[test]
fn test_recorder_stops_at_max_duration() {
    let factory = ScriptedFactory::new(Script::default());
    let settings = RecorderSettings {
        max_duration: Some(Duration::from_millis(250)),
        ..recorder_settings()
    };
    let mut recorder = VideoRecorder::new(settings, factory.boxed());

    let outcomes: Vec<_> = (0..5)
        .map(|i| {
            let frame = gradient_frame(WIDTH, HEIGHT, i * FRAME_US);
            recorder.process_frame(&frame.view()).unwrap()
        })
        .collect();

    assert_eq!(
        outcomes,
        vec![
            FrameOutcome::Encoded,
            FrameOutcome::Encoded,
            FrameOutcome::Encoded,
            FrameOutcome::LimitReached,
            FrameOutcome::LimitReached,
        ]
    );
    assert!(recorder.limit_reached());
    assert_eq!(recorder.stop().unwrap().metadata.frame_count, 3);
}

#[test]
fn test_recorder_without_encoder_fails_on_first_frame() {
    let factory = ScriptedFactory::new(Script {
        unavailable: vec![VideoCodec::H264],
        ..Default::default()
    });
    let mut recorder = VideoRecorder::new(recorder_settings(), factory.boxed());
    let frame = gradient_frame(WIDTH, HEIGHT, 0);

    let result = recorder.process_frame(&frame.view());
    assert!(matches!(result, Err(RecordingError::EncoderNotAvailable(_))));
    assert_eq!(recorder.stop(), Err(RecordingError::NoSamples));
}

#[test]
fn test_recorder_stop_before_first_frame() {
    let factory = ScriptedFactory::new(Script::default());
    let mut recorder = VideoRecorder::new(recorder_settings(), factory.boxed());
    assert_eq!(recorder.stop(), Err(RecordingError::NoSamples));
    assert!(factory.log().lock().unwrap().opened.is_empty());
}

#[test]
fn test_failed_start_leaves_sink_with_caller() {
    let factory = ScriptedFactory::new(Script {
        unavailable: vec![VideoCodec::H264],
        ..Default::default()
    });
    let mut driver = EncoderDriver::new(factory.boxed());
    let mut sink = Some(ContainerMuxer::new(FRAME_US));

    let result = driver.start_from(&h264_config(), WIDTH, HEIGHT, &mut sink);
    assert!(matches!(result, Err(RecordingError::EncoderNotAvailable(_))));
    assert!(sink.is_some());
    assert!(!driver.is_running());

    let factory = ScriptedFactory::new(Script::default());
    let mut driver = EncoderDriver::new(factory.boxed());
    driver
        .start_from(&h264_config(), WIDTH, HEIGHT, &mut sink)
        .unwrap();
    assert!(sink.is_none());
    assert!(driver.is_running());
}
