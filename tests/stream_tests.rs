// SPDX-License-Identifier: MPL-2.0

//! Stream framing, rate gating and the streaming session

mod common;

use common::{ConfigDelivery, H264_SPS, Script, ScriptedFactory, gradient_frame};
use labcam::RecordingError;
use labcam::backends::camera::SensorRotation;
use labcam::control::CaptureSession;
use labcam::media::WatermarkRenderer;
use labcam::media::encoders::VideoCodec;
use labcam::pipelines::stream::{
    FrameRateGate, StreamFrameHeader, StreamSession, StreamSettings, StreamSink, Transport,
    VecTransport, decode_message,
};
use labcam::pipelines::video::EncoderConfig;

const WIDTH: u32 = 128;
const HEIGHT: u32 = 96;

fn settings(target_fps: u32) -> StreamSettings {
    StreamSettings {
        encoder: EncoderConfig {
            codec_priority: vec![VideoCodec::H264],
            fps: 10,
            ..Default::default()
        },
        target_fps,
        watermark: None,
        ..Default::default()
    }
}

fn session(
    target_fps: u32,
    script: Script,
    transport: VecTransport,
) -> StreamSession<VecTransport> {
    let factory = ScriptedFactory::new(script);
    StreamSession::new(
        settings(target_fps),
        factory.boxed(),
        transport,
        WatermarkRenderer::new(),
    )
}

#[test]
fn test_gate_at_ten_fps_passes_every_other_50ms_tick() {
    let mut gate = FrameRateGate::new();
    let passed: Vec<bool> = (0..6u64)
        .map(|tick| gate.should_send(10, tick * 50_000_000))
        .collect();
    assert_eq!(passed, vec![true, false, true, false, true, false]);
}

#[test]
fn test_gate_zero_fps_is_unlimited() {
    let mut gate = FrameRateGate::new();
    assert!((0..5).all(|_| gate.should_send(0, 1_000)));
}

#[test]
fn test_gate_reset_accepts_next_frame() {
    let mut gate = FrameRateGate::new();
    assert!(gate.should_send(1, 0));
    assert!(!gate.should_send(1, 10));
    gate.reset();
    assert!(gate.should_send(1, 20));
}

#[test]
fn test_header_is_big_endian() {
    let header = StreamFrameHeader {
        timestamp_ms: 0x0102_0304_0506_0708,
        sequence: 0x0A0B_0C0D,
        length: 3,
    };
    assert_eq!(
        header.encode(),
        [1, 2, 3, 4, 5, 6, 7, 8, 0x0A, 0x0B, 0x0C, 0x0D, 0, 0, 0, 3]
    );
    assert_eq!(StreamFrameHeader::decode(&header.encode()), Ok(header));
}

#[test]
fn test_sequence_wraps_after_max() {
    let mut sink = StreamSink::new(VecTransport::new()).with_sequence(u32::MAX);
    sink.frame(&[0xAA], 1).unwrap();
    sink.frame(&[0xBB], 2).unwrap();

    let sequences: Vec<u32> = sink
        .transport()
        .messages()
        .iter()
        .map(|m| decode_message(m).unwrap().0.sequence)
        .collect();
    assert_eq!(sequences, vec![u32::MAX, 0]);
    assert_eq!(sink.next_sequence(), 1);
}

#[test]
fn test_sequence_advances_on_transport_failure() {
    let mut sink = StreamSink::new(VecTransport::rejecting());
    assert!(sink.frame(&[1, 2], 0).is_err());
    assert!(sink.frame(&[3], 0).is_err());
    assert_eq!(sink.next_sequence(), 2);
    assert_eq!(sink.summary().send_failures, 2);
    assert!(!sink.is_closed());
}

#[test]
fn test_message_payload_follows_header() {
    let mut sink = StreamSink::new(VecTransport::new());
    sink.frame(&[9, 8, 7], 1234).unwrap();

    let message = &sink.transport().messages()[0];
    assert_eq!(message.len(), 16 + 3);
    let (header, payload) = decode_message(message).unwrap();
    assert_eq!(header.timestamp_ms, 1234);
    assert_eq!(header.length, 3);
    assert_eq!(payload, &[9, 8, 7]);
}

#[test]
fn test_truncated_message_is_rejected() {
    let mut sink = StreamSink::new(VecTransport::new());
    sink.frame(&[1, 2, 3, 4], 0).unwrap();
    let message = &sink.transport().messages()[0];
    assert!(decode_message(&message[..message.len() - 1]).is_err());
    assert!(decode_message(&message[..10]).is_err());
}

#[test]
fn test_session_streams_gated_frames() {
    let mut session = session(10, Script::default(), VecTransport::new());

    // 50 ms capture cadence against a 10 fps target
    for i in 0..6 {
        let frame = gradient_frame(WIDTH, HEIGHT, i * 50_000);
        assert_eq!(session.process_frame(&frame.view()), Ok(true));
    }
    assert!(session.is_streaming());

    let sink = session.sink().unwrap();
    assert_eq!(sink.sent(), 3);
    assert_eq!(sink.gated(), 3);

    let messages = sink.transport().messages().to_vec();
    let headers: Vec<StreamFrameHeader> = messages
        .iter()
        .map(|m| decode_message(m).unwrap().0)
        .collect();
    assert_eq!(
        headers.iter().map(|h| h.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        headers.iter().map(|h| h.timestamp_ms).collect::<Vec<_>>(),
        vec![0, 100, 200]
    );

    let output = session.stop().unwrap();
    assert_eq!(output.stream.sent, 3);
    assert_eq!(output.stream.gated, 3);
    assert_eq!(output.stream.next_sequence, 3);
    assert_eq!(output.session.frame_count, 3);
    assert_eq!((output.session.width, output.session.height), (WIDTH, HEIGHT));
}

#[test]
fn test_session_keyframes_carry_parameter_sets() {
    let script = Script::with_config(ConfigDelivery::FormatChanged);
    let mut session = session(0, script, VecTransport::new());
    let frame = gradient_frame(WIDTH, HEIGHT, 0);
    session.process_frame(&frame.view()).unwrap();

    let sink = session.sink().unwrap();
    let (_, payload) = decode_message(&sink.transport().messages()[0]).unwrap();
    assert!(payload.windows(H264_SPS.len()).any(|w| w == H264_SPS));
}

#[test]
fn test_stop_before_first_frame() {
    let mut session = session(10, Script::default(), VecTransport::new());
    assert_eq!(session.finish(), Err(RecordingError::NoSamples));
}

#[test]
fn test_closed_transport_ends_session() {
    let mut transport = VecTransport::new();
    transport.close();
    let mut session = session(0, Script::default(), transport);

    let frame = gradient_frame(WIDTH, HEIGHT, 0);
    assert_eq!(session.push_frame(&frame.view()), Ok(true));
    assert!(session.sink().unwrap().is_closed());

    let next = gradient_frame(WIDTH, HEIGHT, 100_000);
    assert_eq!(session.push_frame(&next.view()), Ok(false));
}

#[test]
fn test_stream_without_encoder_keeps_transport() {
    let script = Script {
        unavailable: vec![VideoCodec::H264],
        ..Default::default()
    };
    let mut session = session(0, script, VecTransport::new());

    for i in 0..2 {
        let frame = gradient_frame(WIDTH, HEIGHT, i * 100_000);
        let result = session.process_frame(&frame.view());
        assert!(matches!(result, Err(RecordingError::EncoderNotAvailable(_))));
    }
    assert!(!session.is_streaming());

    let sink = session.sink().unwrap();
    assert!(!sink.is_closed());
    assert!(sink.transport().messages().is_empty());

    assert_eq!(session.stop(), Err(RecordingError::NoSamples));
}

#[test]
fn test_refused_sends_are_not_counted_as_written() {
    let mut session = session(0, Script::default(), VecTransport::rejecting());
    for i in 0..3 {
        let frame = gradient_frame(WIDTH, HEIGHT, i * 100_000);
        assert_eq!(session.process_frame(&frame.view()), Ok(true));
    }

    let sink = session.sink().unwrap();
    assert_eq!(sink.sent(), 0);
    assert_eq!(sink.summary().send_failures, 3);

    assert_eq!(session.stop(), Err(RecordingError::NoSamples));
}

#[test]
fn test_empty_frame_is_rejected_without_panicking() {
    let settings = StreamSettings {
        rotation: SensorRotation::Rotate90,
        ..settings(0)
    };
    let factory = ScriptedFactory::new(Script::default());
    let mut session = StreamSession::new(
        settings,
        factory.boxed(),
        VecTransport::new(),
        WatermarkRenderer::new(),
    );

    let empty = gradient_frame(0, 0, 0);
    assert!(matches!(
        session.process_frame(&empty.view()),
        Err(RecordingError::StartFailed(_))
    ));
    assert!(factory.log().lock().unwrap().opened.is_empty());

    let frame = gradient_frame(WIDTH, HEIGHT, 100_000);
    assert_eq!(session.process_frame(&frame.view()), Ok(true));
    assert!(session.is_streaming());
}
