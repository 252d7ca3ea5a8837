// SPDX-License-Identifier: MPL-2.0

//! Crop rectangles for the streaming session
//!
//! Streaming encoders are fed 32-pixel aligned frames. The crop is computed
//! in upright (rotated) coordinates, kept inside the sensor's reported crop
//! and centered. Anything degenerate falls back to the even-truncated full
//! frame.

use crate::backends::camera::types::{CropRect, SensorRotation};
use crate::constants::stream::CROP_ALIGNMENT;
use crate::control::Size;

/// Round down to a multiple of `alignment`, at least 2 and even
pub fn align_even(value: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    let aligned = ((value / alignment) * alignment).max(2);
    aligned & !1
}

/// Largest `aspect`-shaped rectangle inside `width`x`height`, aligned and
/// centered
///
/// A landscape aspect always yields a landscape rectangle.
pub fn aspect_crop(width: u32, height: u32, aspect: Size, alignment: u32) -> CropRect {
    let ratio = aspect.width.max(1) as f64 / aspect.height.max(1) as f64;
    let max_w = width & !1;
    let max_h = height & !1;

    let mut crop_w = max_w;
    let mut crop_h = (crop_w as f64 / ratio) as u32;
    if crop_h > max_h {
        crop_h = max_h;
        crop_w = (crop_h as f64 * ratio) as u32;
    }

    crop_w = align_even(crop_w, alignment);
    crop_h = align_even(crop_h, alignment);
    if crop_w > max_w {
        crop_w = align_even(max_w, alignment);
    }
    if crop_h > max_h {
        crop_h = align_even(max_h, alignment);
    }

    if ratio > 1.0 && crop_w <= crop_h {
        crop_w = align_even(max_w, alignment);
        crop_h = align_even((crop_w as f64 / ratio) as u32, alignment);
        if crop_h > max_h {
            crop_h = align_even(max_h, alignment);
            crop_w = align_even((crop_h as f64 * ratio) as u32, alignment);
        }
    }

    CropRect::full(width, height).centered_within(crop_w, crop_h)
}

/// Rotate a sensor-space rectangle into upright coordinates
pub fn rotate_rect(rect: CropRect, width: u32, height: u32, rotation: SensorRotation) -> CropRect {
    if rect.is_degenerate() || rotation == SensorRotation::None || width == 0 || height == 0 {
        return rect;
    }
    let clamped = CropRect::new(
        rect.left.clamp(0, width as i32 - 1),
        rect.top.clamp(0, height as i32 - 1),
        rect.right.clamp(1, width as i32),
        rect.bottom.clamp(1, height as i32),
    );
    let (w, h) = (width as usize, height as usize);
    let (x0, y0) = rotation.map(clamped.left as usize, clamped.top as usize, w, h);
    let (x1, y1) = rotation.map(
        (clamped.right - 1) as usize,
        (clamped.bottom - 1) as usize,
        w,
        h,
    );
    CropRect::new(
        x0.min(x1) as i32,
        y0.min(y1) as i32,
        x0.max(x1) as i32 + 1,
        y0.max(y1) as i32 + 1,
    )
}

/// Crop for a streaming session on a `width`x`height` sensor frame
///
/// `sensor_crop` is in sensor coordinates. An explicit resolution wins over
/// an aspect ratio. The requested size is clamped to the sensor crop and
/// re-centered inside it.
pub fn stream_crop_rect(
    width: u32,
    height: u32,
    rotation: SensorRotation,
    sensor_crop: CropRect,
    resolution: Option<Size>,
    aspect_ratio: Option<Size>,
) -> CropRect {
    let (upright_w, upright_h) = if rotation.swaps_dimensions() {
        (height, width)
    } else {
        (width, height)
    };
    let full = CropRect::full(upright_w, upright_h);

    let bounds = if sensor_crop.is_degenerate() {
        full
    } else {
        rotate_rect(sensor_crop, width, height, rotation).normalized(upright_w, upright_h)
    };

    let rect = match (resolution, aspect_ratio) {
        (Some(size), _) => bounds.centered_within(size.width, size.height),
        (None, Some(aspect)) => {
            let inner = aspect_crop(
                bounds.width() as u32,
                bounds.height() as u32,
                aspect,
                CROP_ALIGNMENT,
            );
            CropRect::new(
                bounds.left + inner.left,
                bounds.top + inner.top,
                bounds.left + inner.right,
                bounds.top + inner.bottom,
            )
        }
        (None, None) => bounds,
    };

    if rect.is_degenerate() {
        full
    } else {
        rect.normalized(upright_w, upright_h)
    }
}
