// SPDX-License-Identifier: MPL-2.0

//! Built-in stroke font and rasterizer for the timestamp watermark
//!
//! Each glyph is a handful of polylines on a 4x8 design grid. Rasterization
//! strokes those lines with a round pen, supersamples every pixel 4x4 for
//! antialiased coverage and then thresholds coverage into a monochrome grid.
//! The font size starts at 85% of the cell height and shrinks in half-pixel
//! steps until the glyph (plus a one pixel left bearing) fits the cell width.

/// Design grid height in font units
const DESIGN_HEIGHT: f32 = 8.0;

/// Share of the font size taken by the design grid
const CAP_HEIGHT_RATIO: f32 = 0.8;

/// Pen width relative to the font size
const STROKE_RATIO: f32 = 0.12;

/// Initial font size relative to the cell height
const INITIAL_SIZE_RATIO: f32 = 0.85;

/// Font size decrement while auto-shrinking
const SHRINK_STEP: f32 = 0.5;

/// Supersampling factor per axis
const SUPERSAMPLE: usize = 4;

/// Coverage threshold on the 0..=255 scale; anything above is foreground
const COVERAGE_THRESHOLD: usize = 128;

/// Blank columns before the first inked column
const LEFT_BEARING: f32 = 1.0;

type Point = (f32, f32);

/// Polylines making up a glyph, in design units
fn strokes(c: char) -> Option<&'static [&'static [Point]]> {
    let strokes: &'static [&'static [Point]] = match c {
        '0' => &[&[(0.0, 0.0), (4.0, 0.0), (4.0, 8.0), (0.0, 8.0), (0.0, 0.0)]],
        '1' => &[&[(0.0, 1.0), (1.0, 0.0), (1.0, 8.0)], &[(0.0, 8.0), (2.0, 8.0)]],
        '2' => &[&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 8.0), (4.0, 8.0)]],
        '3' => &[
            &[(0.0, 0.0), (4.0, 0.0), (4.0, 8.0), (0.0, 8.0)],
            &[(0.0, 4.0), (4.0, 4.0)],
        ],
        '4' => &[&[(0.0, 0.0), (0.0, 4.0), (4.0, 4.0)], &[(4.0, 0.0), (4.0, 8.0)]],
        '5' => &[&[(4.0, 0.0), (0.0, 0.0), (0.0, 4.0), (4.0, 4.0), (4.0, 8.0), (0.0, 8.0)]],
        '6' => &[&[(4.0, 0.0), (0.0, 0.0), (0.0, 8.0), (4.0, 8.0), (4.0, 4.0), (0.0, 4.0)]],
        '7' => &[&[(0.0, 0.0), (4.0, 0.0), (4.0, 8.0)]],
        '8' => &[
            &[(0.0, 0.0), (4.0, 0.0), (4.0, 8.0), (0.0, 8.0), (0.0, 0.0)],
            &[(0.0, 4.0), (4.0, 4.0)],
        ],
        '9' => &[&[(4.0, 4.0), (0.0, 4.0), (0.0, 0.0), (4.0, 0.0), (4.0, 8.0), (0.0, 8.0)]],
        '-' => &[&[(0.0, 4.0), (3.0, 4.0)]],
        ':' => &[&[(0.0, 2.5)], &[(0.0, 5.5)]],
        ' ' => &[],
        'T' => &[&[(0.0, 0.0), (4.0, 0.0)], &[(2.0, 0.0), (2.0, 8.0)]],
        'i' => &[&[(0.0, 1.0)], &[(0.0, 3.5), (0.0, 8.0)]],
        'm' => &[
            &[(0.0, 3.0), (0.0, 8.0)],
            &[(0.0, 3.5), (1.0, 3.0), (2.0, 3.5), (2.0, 8.0)],
            &[(2.0, 3.5), (3.0, 3.0), (4.0, 3.5), (4.0, 8.0)],
        ],
        'e' => &[&[(0.0, 5.5), (4.0, 5.5), (4.0, 3.0), (0.0, 3.0), (0.0, 8.0), (4.0, 8.0)]],
        _ => return None,
    };
    Some(strokes)
}

/// Whether the built-in font can draw `c`
pub fn has_glyph(c: char) -> bool {
    strokes(c).is_some()
}

/// Monochrome glyph bitmap: 1 = foreground, 0 = background
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub width: u32,
    pub height: u32,
    /// Horizontal distance to the next glyph
    pub advance: u32,
    bits: Vec<u8>,
}

impl Glyph {
    /// Bit at `(x, y)`; out-of-cell coordinates read as background
    #[inline]
    pub fn bit(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.bits[(y * self.width + x) as usize]
    }

    /// Row-major bits
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn ink_pixels(&self) -> usize {
        self.bits.iter().filter(|&&b| b == 1).count()
    }
}

struct Metrics {
    scale: f32,
    stroke: f32,
}

impl Metrics {
    fn for_size(size: f32) -> Self {
        Self {
            scale: size * CAP_HEIGHT_RATIO / DESIGN_HEIGHT,
            stroke: (size * STROKE_RATIO).max(1.0),
        }
    }

    /// Inked width of a glyph with `design_width` font units
    fn ink_width(&self, design_width: f32) -> f32 {
        design_width * self.scale + self.stroke
    }
}

fn design_width(strokes: &[&[Point]]) -> f32 {
    strokes
        .iter()
        .flat_map(|line| line.iter())
        .map(|&(x, _)| x)
        .fold(0.0, f32::max)
}

/// Rasterize `c` into a `cell_width`x`cell_height` monochrome cell
///
/// Returns `None` for characters the built-in font does not cover.
pub fn rasterize(c: char, cell_width: u32, cell_height: u32) -> Option<Glyph> {
    let strokes = strokes(c)?;
    let width = design_width(strokes);

    let mut size = cell_height as f32 * INITIAL_SIZE_RATIO;
    let mut metrics = Metrics::for_size(size);
    while LEFT_BEARING + metrics.ink_width(width) > cell_width as f32 && size > 1.0 {
        size -= SHRINK_STEP;
        metrics = Metrics::for_size(size);
    }

    let glyph_height = DESIGN_HEIGHT * metrics.scale + metrics.stroke;
    let origin_x = LEFT_BEARING + metrics.stroke / 2.0;
    let origin_y = (cell_height as f32 - glyph_height) / 2.0 + metrics.stroke / 2.0;
    let radius = metrics.stroke / 2.0;

    // Segments in pixel space, a lone point becomes a zero-length segment
    let segments: Vec<(Point, Point)> = strokes
        .iter()
        .flat_map(|line| {
            let to_px = |&(x, y): &Point| (origin_x + x * metrics.scale, origin_y + y * metrics.scale);
            let points: Vec<Point> = line.iter().map(to_px).collect();
            if points.len() == 1 {
                vec![(points[0], points[0])]
            } else {
                points.windows(2).map(|w| (w[0], w[1])).collect()
            }
        })
        .collect();

    let mut bits = vec![0u8; (cell_width * cell_height) as usize];
    let step = 1.0 / SUPERSAMPLE as f32;
    for py in 0..cell_height {
        for px in 0..cell_width {
            let mut hits = 0usize;
            for sy in 0..SUPERSAMPLE {
                for sx in 0..SUPERSAMPLE {
                    let sample = (
                        px as f32 + (sx as f32 + 0.5) * step,
                        py as f32 + (sy as f32 + 0.5) * step,
                    );
                    if segments
                        .iter()
                        .any(|&(a, b)| distance_to_segment(sample, a, b) <= radius)
                    {
                        hits += 1;
                    }
                }
            }
            let coverage = hits * 255 / (SUPERSAMPLE * SUPERSAMPLE);
            if coverage > COVERAGE_THRESHOLD {
                bits[(py * cell_width + px) as usize] = 1;
            }
        }
    }

    let advance = if strokes.is_empty() {
        // Space: a third of the cell
        (cell_width / 3).max(1)
    } else {
        ((LEFT_BEARING + metrics.ink_width(width)).ceil() as u32).clamp(1, cell_width.max(1))
    };

    Some(Glyph {
        width: cell_width,
        height: cell_height,
        advance,
        bits,
    })
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}
