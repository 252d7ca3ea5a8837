// SPDX-License-Identifier: GPL-3.0-only

//! Frame types shared by the capture side and the pipeline stages

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One plane of a sensor frame, borrowed for a single pipeline pass
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    /// Raw plane bytes
    pub data: &'a [u8],
    /// Bytes between the starts of consecutive rows
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row
    pub pixel_stride: usize,
}

impl<'a> Plane<'a> {
    pub fn new(data: &'a [u8], row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Read the sample at plane coordinates `(x, y)`
    ///
    /// Returns `None` when the stride arithmetic points past the end of the
    /// buffer, which happens when a producer reports geometry that does not
    /// match the bytes it handed over.
    #[inline]
    pub fn sample(&self, x: usize, y: usize) -> Option<u8> {
        let index = y
            .checked_mul(self.row_stride)?
            .checked_add(x.checked_mul(self.pixel_stride)?)?;
        self.data.get(index).copied()
    }

    /// Contiguous row slice, available only for tightly packed rows
    #[inline]
    pub fn packed_row(&self, y: usize, x: usize, len: usize) -> Option<&'a [u8]> {
        if self.pixel_stride != 1 {
            return None;
        }
        let start = y.checked_mul(self.row_stride)?.checked_add(x)?;
        self.data.get(start..start.checked_add(len)?)
    }

    /// Whether every sample of a `width`x`height` grid is addressable
    pub fn covers(&self, width: usize, height: usize) -> bool {
        if width == 0 || height == 0 {
            return true;
        }
        self.sample(width - 1, height - 1).is_some()
    }
}

/// Raw sensor frame: planar Y/U/V with per-plane strides
///
/// Borrowed from the camera subsystem for the duration of one pipeline pass;
/// nothing in the pipeline retains a reference past that pass.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// Y, U and V planes in that order
    pub planes: [Plane<'a>; 3],
    /// Capture timestamp in microseconds
    pub timestamp_us: i64,
    /// Crop rectangle reported by the sensor
    pub crop: CropRect,
}

impl CapturedFrame<'_> {
    pub fn luma(&self) -> &Plane<'_> {
        &self.planes[0]
    }

    /// Frame dimensions after applying `rotation`
    pub fn rotated_size(&self, rotation: SensorRotation) -> (u32, u32) {
        if rotation.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Owned plane storage used when a frame must outlive the producer callback
#[derive(Debug, Clone)]
pub struct OwnedPlane {
    pub data: Arc<[u8]>,
    /// Offset of the first sample inside `data`
    pub offset: usize,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl OwnedPlane {
    fn view(&self) -> Plane<'_> {
        let data = self.data.get(self.offset..).unwrap_or(&[]);
        Plane::new(data, self.row_stride, self.pixel_stride)
    }
}

/// Owned counterpart of [`CapturedFrame`]
///
/// This is what travels through the single-slot frame mailbox; the pipeline
/// stages only ever see the borrowed view.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub width: u32,
    pub height: u32,
    pub planes: [OwnedPlane; 3],
    pub timestamp_us: i64,
    pub crop: CropRect,
}

impl FrameData {
    /// Build an owned NV12 frame: Y plane followed by interleaved U/V
    pub fn from_nv12(data: Vec<u8>, width: u32, height: u32, timestamp_us: i64) -> Self {
        let data: Arc<[u8]> = data.into();
        let w = width as usize;
        let luma_len = w * height as usize;
        let plane = |offset, row_stride, pixel_stride| OwnedPlane {
            data: Arc::clone(&data),
            offset,
            row_stride,
            pixel_stride,
        };

        Self {
            width,
            height,
            planes: [plane(0, w, 1), plane(luma_len, w, 2), plane(luma_len + 1, w, 2)],
            timestamp_us,
            crop: CropRect::full(width, height),
        }
    }

    /// Borrow the frame for one pipeline pass
    pub fn view(&self) -> CapturedFrame<'_> {
        CapturedFrame {
            width: self.width,
            height: self.height,
            planes: [
                self.planes[0].view(),
                self.planes[1].view(),
                self.planes[2].view(),
            ],
            timestamp_us: self.timestamp_us,
            crop: self.crop,
        }
    }
}

/// Crop rectangle in pixel coordinates (`right`/`bottom` exclusive)
///
/// 4:2:0 subsampling requires every edge and both extents to be even;
/// [`CropRect::normalized`] establishes that before any pixel is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CropRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl CropRect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Whole frame, truncated to even dimensions
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, (width & !1) as i32, (height & !1) as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() < 2 || self.height() < 2
    }

    pub fn is_even(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| v % 2 == 0)
    }

    /// Clamp into `[0, max_width) x [0, max_height)` with all edges even
    ///
    /// Left/top are clamped and rounded down to even, right/bottom are kept at
    /// least two pixels past them, and an odd extent loses its last column or
    /// row. A degenerate request (or a frame narrower than two pixels in either
    /// direction) falls back to the even-truncated full frame.
    pub fn normalized(&self, max_width: u32, max_height: u32) -> CropRect {
        let max_w = max_width as i32;
        let max_h = max_height as i32;
        if self.is_degenerate() || max_w < 2 || max_h < 2 {
            return CropRect::full(max_width, max_height);
        }

        let left = self.left.clamp(0, max_w - 2) & !1;
        let top = self.top.clamp(0, max_h - 2) & !1;
        let mut right = self.right.clamp(left + 2, max_w);
        let mut bottom = self.bottom.clamp(top + 2, max_h);

        if (right - left) % 2 != 0 {
            right -= 1;
        }
        if (bottom - top) % 2 != 0 {
            bottom -= 1;
        }

        CropRect::new(left, top, right, bottom)
    }

    /// Even rectangle of at most `width`x`height` centered inside `self`
    pub fn centered_within(&self, width: u32, height: u32) -> CropRect {
        let w = (width as i32).min(self.width()).max(0) & !1;
        let h = (height as i32).min(self.height()).max(0) & !1;
        let left = (self.left + (self.width() - w) / 2) & !1;
        let top = (self.top + (self.height() - h) / 2) & !1;
        CropRect::new(left, top, left + w, top + h)
    }
}

impl std::fmt::Display for CropRect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{} {}x{}]",
            self.left,
            self.top,
            self.width(),
            self.height()
        )
    }
}

/// Sensor rotation in degrees (clockwise)
///
/// Phone sensors are usually mounted at 90° or 270° relative to the display,
/// so frames are rotated upright before cropping and encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }

    /// Rotation that undoes this one
    pub fn inverse(&self) -> Self {
        Self::from_degrees_int(360 - self.degrees() as i32)
    }

    /// Map source coordinates `(x, y)` of a `width`x`height` grid into the
    /// rotated grid
    #[inline]
    pub fn map(&self, x: usize, y: usize, width: usize, height: usize) -> (usize, usize) {
        match self {
            SensorRotation::None => (x, y),
            SensorRotation::Rotate90 => (height - 1 - y, x),
            SensorRotation::Rotate180 => (width - 1 - x, height - 1 - y),
            SensorRotation::Rotate270 => (y, width - 1 - x),
        }
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// 4:2:0 output layout expected by the encoder session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaLayout {
    /// Y plane followed by interleaved U/V (semi-planar)
    #[default]
    Nv12,
    /// Y plane followed by separate U and V planes
    I420,
}

impl ChromaLayout {
    /// Raw-video format name as understood by GStreamer caps
    pub fn format_name(&self) -> &'static str {
        match self {
            ChromaLayout::Nv12 => "NV12",
            ChromaLayout::I420 => "I420",
        }
    }
}

/// Encoder-ready 4:2:0 frame
///
/// Always exactly `width * height * 3 / 2` bytes with even dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: ChromaLayout,
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
}

impl PixelBuffer {
    /// Expected byte length of a 4:2:0 frame
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3 / 2
    }

    pub fn luma(&self) -> &[u8] {
        let len = self.width as usize * self.height as usize;
        &self.data[..len.min(self.data.len())]
    }

    pub fn luma_mut(&mut self) -> &mut [u8] {
        let len = (self.width as usize * self.height as usize).min(self.data.len());
        &mut self.data[..len]
    }

    /// View the buffer as a captured frame so it can be fed back through the
    /// converter
    pub fn as_frame(&self) -> CapturedFrame<'_> {
        let w = self.width as usize;
        let luma_len = w * self.height as usize;
        let chroma_len = luma_len / 4;
        let tail = |offset: usize| self.data.get(offset..).unwrap_or(&[]);

        let planes = match self.layout {
            ChromaLayout::Nv12 => [
                Plane::new(&self.data, w, 1),
                Plane::new(tail(luma_len), w, 2),
                Plane::new(tail(luma_len + 1), w, 2),
            ],
            ChromaLayout::I420 => [
                Plane::new(&self.data, w, 1),
                Plane::new(tail(luma_len), w / 2, 1),
                Plane::new(tail(luma_len + chroma_len), w / 2, 1),
            ],
        };

        CapturedFrame {
            width: self.width,
            height: self.height,
            planes,
            timestamp_us: self.timestamp_us,
            crop: CropRect::full(self.width, self.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_rounds_to_even() {
        let rect = CropRect::new(3, 5, 101, 77).normalized(200, 100);
        assert!(rect.is_even());
        assert_eq!(rect, CropRect::new(2, 4, 100, 76));
    }

    #[test]
    fn test_normalized_clamps_to_frame() {
        let rect = CropRect::new(-10, -4, 500, 300).normalized(320, 240);
        assert_eq!(rect, CropRect::new(0, 0, 320, 240));

        // Odd frame dimensions lose the last column/row
        let rect = CropRect::new(0, 0, 321, 241).normalized(321, 241);
        assert_eq!(rect, CropRect::new(0, 0, 320, 240));
    }

    #[test]
    fn test_degenerate_falls_back_to_full_frame() {
        let rect = CropRect::new(50, 50, 51, 90).normalized(321, 240);
        assert_eq!(rect, CropRect::full(321, 240));
        assert_eq!(rect, CropRect::new(0, 0, 320, 240));
    }

    #[test]
    fn test_left_edge_near_border() {
        let rect = CropRect::new(319, 0, 320, 240).normalized(320, 240);
        assert!(!rect.is_degenerate());
    }

    #[test]
    fn test_rotation_map_round_trip() {
        let (w, h) = (6usize, 4usize);
        for y in 0..h {
            for x in 0..w {
                let (rx, ry) = SensorRotation::Rotate90.map(x, y, w, h);
                assert!(rx < h && ry < w);
                assert_eq!(SensorRotation::Rotate270.map(rx, ry, h, w), (x, y));
            }
        }
    }

    #[test]
    fn test_sensor_rotation_from_degrees() {
        assert_eq!(SensorRotation::from_degrees_int(-90), SensorRotation::Rotate270);
        assert_eq!(SensorRotation::from_degrees_int(450), SensorRotation::Rotate90);
        assert_eq!(SensorRotation::Rotate90.inverse(), SensorRotation::Rotate270);
        assert_eq!(SensorRotation::None.inverse(), SensorRotation::None);
        assert_eq!(SensorRotation::Rotate180.to_string(), "180°");
    }

    #[test]
    fn test_plane_sample_out_of_range() {
        let data = [1u8, 2, 3, 4];
        let plane = Plane::new(&data, 2, 1);
        assert_eq!(plane.sample(1, 1), Some(4));
        assert_eq!(plane.sample(0, 2), None);
        assert!(plane.covers(2, 2));
        assert!(!plane.covers(3, 2));
    }

    #[test]
    fn test_nv12_frame_planes() {
        let mut data = vec![0u8; 4 * 2 * 3 / 2];
        data[8] = 10; // U(0,0)
        data[9] = 20; // V(0,0)
        let frame = FrameData::from_nv12(data, 4, 2, 0);
        let view = frame.view();
        assert_eq!(view.planes[1].sample(0, 0), Some(10));
        assert_eq!(view.planes[2].sample(0, 0), Some(20));
    }
}
