// SPDX-License-Identifier: MPL-2.0

//! Sensor planes to encoder-ready 4:2:0 conversion
//!
//! Camera frames arrive as three planes with arbitrary row and pixel strides
//! (the chroma planes of a semi-planar sensor buffer alias each other with a
//! pixel stride of 2). The converter crops, rotates and repacks them into a
//! tightly packed NV12 buffer, optionally followed by a deinterleave pass when
//! the encoder wants I420.
//!
//! Plane reads that fall outside the buffer a producer actually handed over
//! are replaced with neutral samples (mid-grey chroma) instead of failing the
//! frame. [`ColorConverter`] can be switched to strict geometry checking, in
//! which case such frames are rejected up front.

use crate::backends::camera::types::{
    CapturedFrame, ChromaLayout, CropRect, PixelBuffer, SensorRotation,
};
use crate::constants::video::{FALLBACK_LUMA, NEUTRAL_CHROMA};
use crate::errors::FrameError;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Samples that could not be read and were substituted
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Substitutions {
    pub luma: usize,
    pub chroma: usize,
}

impl Substitutions {
    pub fn is_empty(&self) -> bool {
        self.luma == 0 && self.chroma == 0
    }
}

/// Stateful wrapper around [`convert`] used by the recording and streaming
/// sessions
#[derive(Debug)]
pub struct ColorConverter {
    layout: ChromaLayout,
    strict: bool,
    degraded_frames: AtomicU64,
}

impl ColorConverter {
    pub fn new(layout: ChromaLayout) -> Self {
        Self {
            layout,
            strict: false,
            degraded_frames: AtomicU64::new(0),
        }
    }

    /// Reject frames whose plane geometry does not cover the frame instead of
    /// substituting neutral samples
    pub fn with_strict_geometry(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn layout(&self) -> ChromaLayout {
        self.layout
    }

    /// Frames converted with at least one substituted sample
    pub fn degraded_frames(&self) -> u64 {
        self.degraded_frames.load(Ordering::Relaxed)
    }

    /// Crop, rotate and repack one frame
    ///
    /// Only fails in strict mode; otherwise malformed geometry degrades to
    /// neutral samples.
    pub fn convert(
        &self,
        frame: &CapturedFrame<'_>,
        crop: CropRect,
        rotation: SensorRotation,
    ) -> Result<PixelBuffer, FrameError> {
        if self.strict {
            validate_geometry(frame)?;
        }

        let (buffer, substitutions) = convert_with_report(frame, crop, rotation, self.layout);

        if !substitutions.is_empty() {
            let previous = self.degraded_frames.fetch_add(1, Ordering::Relaxed);
            if previous == 0 {
                warn!(
                    width = frame.width,
                    height = frame.height,
                    luma = substitutions.luma,
                    chroma = substitutions.chroma,
                    "Plane geometry does not cover the frame, substituting neutral samples"
                );
            } else {
                debug!(
                    luma = substitutions.luma,
                    chroma = substitutions.chroma,
                    "Substituted unreadable samples"
                );
            }
        }

        Ok(buffer)
    }
}

/// Check that every plane covers the frame it claims to describe
pub fn validate_geometry(frame: &CapturedFrame<'_>) -> Result<(), FrameError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let expected = [(w, h), (w / 2, h / 2), (w / 2, h / 2)];

    for (index, (plane, (pw, ph))) in frame.planes.iter().zip(expected).enumerate() {
        if !plane.covers(pw, ph) {
            return Err(FrameError::InvalidGeometry(format!(
                "plane {} ({} bytes, row stride {}, pixel stride {}) does not cover {}x{}",
                index,
                plane.data.len(),
                plane.row_stride,
                plane.pixel_stride,
                pw,
                ph
            )));
        }
    }

    Ok(())
}

/// Convert a frame into a packed 4:2:0 buffer
///
/// `crop` is expressed in the rotated frame's coordinates and is normalized to
/// even bounds first. The result is always exactly
/// `crop_width * crop_height * 3 / 2` bytes.
pub fn convert(
    frame: &CapturedFrame<'_>,
    crop: CropRect,
    rotation: SensorRotation,
    layout: ChromaLayout,
) -> PixelBuffer {
    convert_with_report(frame, crop, rotation, layout).0
}

/// [`convert`], also reporting how many samples had to be substituted
pub fn convert_with_report(
    frame: &CapturedFrame<'_>,
    crop: CropRect,
    rotation: SensorRotation,
    layout: ChromaLayout,
) -> (PixelBuffer, Substitutions) {
    let (rotated_width, rotated_height) = frame.rotated_size(rotation);
    let rect = crop.normalized(rotated_width, rotated_height);
    let width = rect.width().max(0) as u32;
    let height = rect.height().max(0) as u32;

    let mut substitutions = Substitutions::default();
    let nv12 = match rotation {
        SensorRotation::None => copy_cropped(frame, rect, &mut substitutions),
        _ => rotate_then_crop(frame, rect, rotation, &mut substitutions),
    };

    let data = match layout {
        ChromaLayout::Nv12 => nv12,
        ChromaLayout::I420 => nv12_to_i420(&nv12, width, height),
    };

    let buffer = PixelBuffer {
        data,
        width,
        height,
        layout,
        timestamp_us: frame.timestamp_us,
    };
    (buffer, substitutions)
}

/// Direct crop and repack for unrotated frames
fn copy_cropped(frame: &CapturedFrame<'_>, rect: CropRect, subs: &mut Substitutions) -> Vec<u8> {
    let w = rect.width().max(0) as usize;
    let h = rect.height().max(0) as usize;
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let left = rect.left as usize;
    let top = rect.top as usize;

    let mut out = vec![0u8; w * h * 3 / 2];
    let (luma_out, chroma_out) = out.split_at_mut(w * h);

    let y_plane = &frame.planes[0];
    for (row, dst) in luma_out.chunks_exact_mut(w).enumerate() {
        let sy = top + row;
        if let Some(src) = y_plane.packed_row(sy, left, w) {
            dst.copy_from_slice(src);
            continue;
        }
        for (col, px) in dst.iter_mut().enumerate() {
            *px = y_plane.sample(left + col, sy).unwrap_or_else(|| {
                subs.luma += 1;
                FALLBACK_LUMA
            });
        }
    }

    let (u_plane, v_plane) = (&frame.planes[1], &frame.planes[2]);
    // Each interleaved chroma row holds w/2 U/V pairs, i.e. w bytes
    for (row, dst) in chroma_out.chunks_exact_mut(w).enumerate() {
        let sy = top / 2 + row;
        for (col, pair) in dst.chunks_exact_mut(2).enumerate() {
            let sx = left / 2 + col;
            match (u_plane.sample(sx, sy), v_plane.sample(sx, sy)) {
                (Some(u), Some(v)) => {
                    pair[0] = u;
                    pair[1] = v;
                }
                _ => {
                    pair[0] = NEUTRAL_CHROMA;
                    pair[1] = NEUTRAL_CHROMA;
                    subs.chroma += 1;
                }
            }
        }
    }

    out
}

/// Two-pass transform: rotate both planes into a full-size intermediate, then
/// crop the intermediate
fn rotate_then_crop(
    frame: &CapturedFrame<'_>,
    rect: CropRect,
    rotation: SensorRotation,
    subs: &mut Substitutions,
) -> Vec<u8> {
    let w = rect.width().max(0) as usize;
    let h = rect.height().max(0) as usize;
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let (src_w, src_h) = (frame.width as usize, frame.height as usize);
    let (rot_w, rot_h) = if rotation.swaps_dimensions() {
        (src_h, src_w)
    } else {
        (src_w, src_h)
    };

    let y_plane = &frame.planes[0];
    let mut luma = vec![FALLBACK_LUMA; rot_w * rot_h];
    for y in 0..src_h {
        for x in 0..src_w {
            let (dx, dy) = rotation.map(x, y, src_w, src_h);
            match y_plane.sample(x, y) {
                Some(value) => luma[dy * rot_w + dx] = value,
                None => subs.luma += 1,
            }
        }
    }

    let (src_cw, src_ch) = (src_w / 2, src_h / 2);
    let rot_cw = if rotation.swaps_dimensions() { src_ch } else { src_cw };
    let rot_ch = if rotation.swaps_dimensions() { src_cw } else { src_ch };
    let (u_plane, v_plane) = (&frame.planes[1], &frame.planes[2]);
    let mut chroma = vec![NEUTRAL_CHROMA; rot_cw * rot_ch * 2];
    for cy in 0..src_ch {
        for cx in 0..src_cw {
            let (dx, dy) = rotation.map(cx, cy, src_cw, src_ch);
            let index = (dy * rot_cw + dx) * 2;
            match (u_plane.sample(cx, cy), v_plane.sample(cx, cy)) {
                (Some(u), Some(v)) => {
                    chroma[index] = u;
                    chroma[index + 1] = v;
                }
                _ => subs.chroma += 1,
            }
        }
    }

    let left = rect.left as usize;
    let top = rect.top as usize;
    let mut out = Vec::with_capacity(w * h * 3 / 2);
    for row in top..top + h {
        let start = row * rot_w + left;
        out.extend_from_slice(&luma[start..start + w]);
    }
    for row in top / 2..(top + h) / 2 {
        let start = (row * rot_cw + left / 2) * 2;
        out.extend_from_slice(&chroma[start..start + w]);
    }

    out
}

/// Reorder interleaved NV12 chroma into separate U and V planes
///
/// Missing trailing bytes in a short input are filled with neutral samples.
pub fn nv12_to_i420(nv12: &[u8], width: u32, height: u32) -> Vec<u8> {
    let luma_len = width as usize * height as usize;
    let quarter = luma_len / 4;
    let mut out = vec![NEUTRAL_CHROMA; luma_len + quarter * 2];

    let copied = luma_len.min(nv12.len());
    out[..copied].copy_from_slice(&nv12[..copied]);

    let uv = nv12.get(luma_len..).unwrap_or(&[]);
    let (u_out, v_out) = out[luma_len..].split_at_mut(quarter);
    for (i, pair) in uv.chunks_exact(2).take(quarter).enumerate() {
        u_out[i] = pair[0];
        v_out[i] = pair[1];
    }

    out
}
