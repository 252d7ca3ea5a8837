// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic frame source
//!
//! Produces NV12-style frames with padded row strides and an interleaved
//! chroma plane, the same shape a phone camera hands over. The pattern is a
//! diagonal luma ramp that scrolls one step per frame plus a chroma gradient,
//! which keeps the encoder busy without needing a physical sensor.

use super::FrameSource;
use super::types::{CropRect, FrameData, OwnedPlane};
use std::sync::Arc;

/// Row alignment applied to generated planes
const ROW_ALIGNMENT: usize = 64;

/// Deterministic moving test pattern
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval_us: i64,
    frame_index: u64,
    frame_limit: Option<u64>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval_us: 1_000_000 / i64::from(fps.max(1)),
            frame_index: 0,
            frame_limit: None,
        }
    }

    /// Stop producing frames after `limit` frames
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    fn row_stride(&self) -> usize {
        (self.width as usize).div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
    }

    /// Render frame number `index`
    pub fn render(&self, index: u64) -> FrameData {
        let w = self.width as usize;
        let h = self.height as usize;
        let stride = self.row_stride();
        let chroma_rows = h.div_ceil(2);
        let luma_len = stride * h;
        let mut data = vec![0u8; luma_len + stride * chroma_rows];
        let shift = index as usize;

        for y in 0..h {
            let row = &mut data[y * stride..y * stride + w];
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x + y + shift * 4) % 256) as u8;
            }
        }

        for cy in 0..chroma_rows {
            let row_start = luma_len + cy * stride;
            for cx in 0..w / 2 {
                data[row_start + cx * 2] = ((cx * 255) / (w / 2).max(1)) as u8;
                data[row_start + cx * 2 + 1] = ((cy * 255) / chroma_rows.max(1)) as u8;
            }
        }

        let data: Arc<[u8]> = data.into();
        let plane = |offset, pixel_stride| OwnedPlane {
            data: Arc::clone(&data),
            offset,
            row_stride: stride,
            pixel_stride,
        };

        FrameData {
            width: self.width,
            height: self.height,
            planes: [plane(0, 1), plane(luma_len, 2), plane(luma_len + 1, 2)],
            timestamp_us: index as i64 * self.frame_interval_us,
            crop: CropRect::full(self.width, self.height),
        }
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Option<FrameData> {
        if self.frame_limit.is_some_and(|limit| self.frame_index >= limit) {
            return None;
        }
        let frame = self.render(self.frame_index);
        self.frame_index += 1;
        Some(frame)
    }

    fn frame_interval_us(&self) -> i64 {
        self.frame_interval_us
    }
}
