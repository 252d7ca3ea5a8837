// SPDX-License-Identifier: MPL-2.0

//! Watermark rendering into an encoder-ready frame

use chrono::NaiveTime;
use labcam::constants::watermark::{BACKGROUND_LUMA, FOREGROUND_LUMA, PADDING};
use labcam::media::WatermarkRenderer;
use labcam::media::watermark::{BlitOutcome, background_rect, timestamp_text};

const W: usize = 200;
const H: usize = 60;
const CELL_W: u32 = 10;
const CELL_H: u32 = 16;
const GREY: u8 = 128;

fn grey_frame() -> Vec<u8> {
    vec![GREY; W * H * 3 / 2]
}

#[test]
fn test_blit_before_preload_leaves_frame_untouched() {
    let renderer = WatermarkRenderer::new();
    let mut frame = grey_frame();

    let outcome = renderer.blit(&mut frame, W as u32, H as u32, "Time: 00:00:00", CELL_W, CELL_H, 10, 10);
    assert_eq!(outcome, BlitOutcome::NotReady);
    assert!(frame.iter().all(|&b| b == GREY));
}

#[test]
fn test_timestamp_drawn_over_background() {
    let renderer = WatermarkRenderer::new();
    assert!(renderer.preload(CELL_W, CELL_H));
    let text = timestamp_text(&NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    assert_eq!(text, "Time: 00:00:00");

    let mut frame = grey_frame();
    let outcome = renderer.blit(&mut frame, W as u32, H as u32, &text, CELL_W, CELL_H, 10, 10);
    assert_eq!(outcome, BlitOutcome::Drawn { skipped: 0 });

    let (x, y, bg_w, bg_h) = background_rect(renderer.cache().unwrap(), &text, 10, 10);
    let (x, y, bg_w, bg_h) = (x as usize, y as usize, bg_w as usize, bg_h as usize);
    assert_eq!((x, y), (10, 10));

    // Frame corners stay untouched
    assert_eq!(frame[0], GREY);
    assert_eq!(frame[W - 1], GREY);
    assert_eq!(frame[(H - 1) * W], GREY);
    assert_eq!(frame[H * W - 1], GREY);

    // Padding is background, text rows contain foreground
    assert_eq!(frame[y * W + x], BACKGROUND_LUMA);
    assert_eq!(frame[(y + bg_h - 1) * W + x + bg_w - 1], BACKGROUND_LUMA);
    assert_eq!(frame[(y + bg_h) * W + x], GREY);
    let text_rows = y + PADDING as usize..y + bg_h - PADDING as usize;
    let ink = text_rows
        .flat_map(|row| frame[row * W + x..row * W + x + bg_w].iter())
        .filter(|&&b| b == FOREGROUND_LUMA)
        .count();
    assert!(ink > 0);

    // Every luma sample inside the box is background or foreground
    for row in y..y + bg_h {
        for &b in &frame[row * W + x..row * W + x + bg_w] {
            assert!(b == BACKGROUND_LUMA || b == FOREGROUND_LUMA);
        }
    }

    assert!(frame[W * H..].iter().all(|&b| b == GREY));
}

#[test]
fn test_different_times_render_differently() {
    let renderer = WatermarkRenderer::new();
    renderer.preload(CELL_W, CELL_H);

    let mut first = grey_frame();
    let mut second = grey_frame();
    let early = timestamp_text(&NaiveTime::from_hms_opt(1, 2, 3).unwrap());
    let late = timestamp_text(&NaiveTime::from_hms_opt(18, 47, 59).unwrap());
    renderer.blit(&mut first, W as u32, H as u32, &early, CELL_W, CELL_H, 10, 10);
    renderer.blit(&mut second, W as u32, H as u32, &late, CELL_W, CELL_H, 10, 10);
    assert_ne!(first, second);
}

#[test]
fn test_clones_share_the_cache() {
    let renderer = WatermarkRenderer::new();
    let shared = renderer.clone();
    assert!(!shared.is_ready());

    renderer.preload(CELL_W, CELL_H);
    assert!(shared.is_ready());
    assert_eq!(shared.cache().unwrap().cell_height(), CELL_H);
}

#[test]
fn test_default_cells_on_black_frame() {
    const FRAME_W: usize = 200;
    const FRAME_H: usize = 60;

    let renderer = WatermarkRenderer::new();
    assert!(renderer.preload(20, 30));
    let text = "Time: 00:00:00";

    let mut frame = vec![0u8; FRAME_W * FRAME_H * 3 / 2];
    let outcome = renderer.blit(&mut frame, FRAME_W as u32, FRAME_H as u32, text, 20, 30, 10, 10);
    assert_eq!(outcome, BlitOutcome::Drawn { skipped: 0 });

    let cache = renderer.cache().unwrap();
    let (x, y, bg_w, bg_h) = background_rect(cache, text, 10, 10);
    let (x, y, bg_w, bg_h) = (x as usize, y as usize, bg_w as usize, bg_h as usize);
    assert_eq!((x, y), (10, 10));
    assert!(x + bg_w <= FRAME_W && y + bg_h <= FRAME_H);

    let luma = |col: usize, row: usize| frame[row * FRAME_W + col];
    assert_eq!(luma(x, y), BACKGROUND_LUMA);
    assert_eq!(luma(x + bg_w - 1, y), BACKGROUND_LUMA);
    assert_eq!(luma(x, y + bg_h - 1), BACKGROUND_LUMA);
    assert_eq!(luma(x + bg_w - 1, y + bg_h - 1), BACKGROUND_LUMA);

    // Every digit cell carries foreground ink
    let text_x = x + PADDING as usize;
    let text_y = y + PADDING as usize;
    let mut offset = 0usize;
    for c in text.chars() {
        let advance = cache.advance(c) as usize;
        if c.is_ascii_digit() {
            let ink = (text_y..text_y + cache.cell_height() as usize)
                .flat_map(|row| (text_x + offset..text_x + offset + advance).map(move |col| (col, row)))
                .filter(|&(col, row)| luma(col, row) == FOREGROUND_LUMA)
                .count();
            assert!(ink > 0, "digit at offset {offset} has no ink");
        }
        offset += advance;
    }
}
