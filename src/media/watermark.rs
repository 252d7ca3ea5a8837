// SPDX-License-Identifier: MPL-2.0

//! Timestamp watermark burned into the luma plane
//!
//! Glyphs are rasterized once per cell size by [`WatermarkRenderer::preload`],
//! normally on a background thread before the first frame arrives. Until that
//! finishes [`WatermarkRenderer::blit`] leaves frames untouched rather than
//! waiting. After preload the cache is immutable and read without locking.

use super::glyphs::{self, Glyph};
use crate::constants::watermark::{
    ALPHABET, BACKGROUND_LUMA, FOREGROUND_LUMA, PADDING, TEXT_PREFIX,
};
use chrono::Timelike;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rasterized glyphs for one (font, cell width, cell height) triple
#[derive(Debug, Clone)]
pub struct GlyphCache {
    cell_width: u32,
    cell_height: u32,
    glyphs: HashMap<char, Glyph>,
}

impl GlyphCache {
    /// Rasterize the watermark alphabet at the given cell size
    pub fn build(cell_width: u32, cell_height: u32) -> Self {
        let glyphs = ALPHABET
            .chars()
            .filter_map(|c| glyphs::rasterize(c, cell_width, cell_height).map(|g| (c, g)))
            .collect();

        Self {
            cell_width,
            cell_height,
            glyphs,
        }
    }

    pub fn get(&self, c: char) -> Option<&Glyph> {
        self.glyphs.get(&c)
    }

    pub fn cell_width(&self) -> u32 {
        self.cell_width
    }

    pub fn cell_height(&self) -> u32 {
        self.cell_height
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Horizontal advance for `c`; a missing glyph still takes a full cell
    pub fn advance(&self, c: char) -> u32 {
        self.get(c).map_or(self.cell_width, |g| g.advance)
    }

    /// Pixel width of `text` without padding
    pub fn text_width(&self, text: &str) -> u32 {
        text.chars().map(|c| self.advance(c)).sum()
    }
}

/// Result of a blit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitOutcome {
    /// Text drawn; `skipped` characters had no cached glyph
    Drawn { skipped: usize },
    /// Glyph preload has not finished, frame untouched
    NotReady,
    /// Cache was built for a different cell size, frame untouched
    CellMismatch,
    /// Background rectangle would leave the frame, frame untouched
    OutOfBounds,
}

/// Background rectangle for `text` at the requested origin
///
/// Returns `(x, y, width, height)` with the origin snapped to even
/// coordinates.
pub fn background_rect(
    cache: &GlyphCache,
    text: &str,
    origin_x: u32,
    origin_y: u32,
) -> (u32, u32, u32, u32) {
    let x = origin_x & !1;
    let y = origin_y & !1;
    let bg_width = cache.text_width(text) + PADDING * 2;
    let bg_height = cache.cell_height() + PADDING * 2;
    (x, y, bg_width, bg_height)
}

/// Draw `text` into the luma plane at the head of `buffer`
///
/// Fills a background rectangle sized to the text plus padding, then copies
/// the foreground bits of each cached glyph at increasing horizontal offsets.
/// Chroma is never touched.
pub fn blit_text(
    cache: &GlyphCache,
    buffer: &mut [u8],
    width: u32,
    height: u32,
    text: &str,
    origin_x: u32,
    origin_y: u32,
) -> BlitOutcome {
    let (x, y, bg_width, bg_height) = background_rect(cache, text, origin_x, origin_y);
    let stride = width as usize;

    if x + bg_width > width
        || y + bg_height > height
        || buffer.len() < stride * height as usize
    {
        debug!(
            width,
            height,
            bg_width,
            bg_height,
            "Watermark does not fit the frame, skipping"
        );
        return BlitOutcome::OutOfBounds;
    }

    for row in y..y + bg_height {
        let start = row as usize * stride + x as usize;
        buffer[start..start + bg_width as usize].fill(BACKGROUND_LUMA);
    }

    let text_x = x + PADDING;
    let text_y = y + PADDING;
    let right_edge = x + bg_width;
    let mut offset = 0u32;
    let mut skipped = 0usize;

    for c in text.chars() {
        let Some(glyph) = cache.get(c) else {
            debug!(character = %c, "Glyph not cached, skipping");
            skipped += 1;
            offset += cache.cell_width();
            continue;
        };

        for gy in 0..glyph.height {
            let row = (text_y + gy) as usize * stride;
            for gx in 0..glyph.width {
                let dst_x = text_x + offset + gx;
                if dst_x >= right_edge {
                    break;
                }
                if glyph.bit(gx, gy) == 1 {
                    buffer[row + dst_x as usize] = FOREGROUND_LUMA;
                }
            }
        }

        offset += glyph.advance;
    }

    BlitOutcome::Drawn { skipped }
}

/// Watermark text for a wall-clock time: `Time: HH:MM:SS`
pub fn timestamp_text<T: Timelike>(time: &T) -> String {
    format!(
        "{}{:02}:{:02}:{:02}",
        TEXT_PREFIX,
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// Watermark text for the current local time
pub fn current_timestamp_text() -> String {
    timestamp_text(&chrono::Local::now())
}

/// Owner of the write-once glyph cache
///
/// Clones share the same cache, so a preload started from one handle is
/// visible to all of them.
#[derive(Debug, Clone, Default)]
pub struct WatermarkRenderer {
    cache: Arc<OnceLock<GlyphCache>>,
}

impl WatermarkRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rasterize and publish the glyph cache
    ///
    /// Returns `false` if a cache was already published; the first preload
    /// wins and the cache never changes afterwards.
    pub fn preload(&self, cell_width: u32, cell_height: u32) -> bool {
        if self.cache.get().is_some() {
            return false;
        }

        let start = Instant::now();
        let cache = GlyphCache::build(cell_width, cell_height);
        let glyph_count = cache.len();

        match self.cache.set(cache) {
            Ok(()) => {
                info!(
                    cell_width,
                    cell_height,
                    glyphs = glyph_count,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Watermark glyph cache ready"
                );
                true
            }
            Err(_) => false,
        }
    }

    /// Run [`Self::preload`] on a background thread
    ///
    /// Falls back to loading inline (and returns `None`) if the thread cannot
    /// be spawned.
    pub fn spawn_preload(&self, cell_width: u32, cell_height: u32) -> Option<JoinHandle<()>> {
        let renderer = self.clone();
        match std::thread::Builder::new()
            .name("watermark-preload".into())
            .spawn(move || {
                renderer.preload(cell_width, cell_height);
            }) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn preload thread, loading inline");
                self.preload(cell_width, cell_height);
                None
            }
        }
    }

    /// Whether the glyph cache has been published
    pub fn is_ready(&self) -> bool {
        self.cache.get().is_some()
    }

    pub fn cache(&self) -> Option<&GlyphCache> {
        self.cache.get()
    }

    /// Draw `text` into the luma plane, or do nothing if preload is not done
    #[allow(clippy::too_many_arguments)]
    pub fn blit(
        &self,
        buffer: &mut [u8],
        width: u32,
        height: u32,
        text: &str,
        cell_width: u32,
        cell_height: u32,
        origin_x: u32,
        origin_y: u32,
    ) -> BlitOutcome {
        let Some(cache) = self.cache.get() else {
            debug!("Watermark glyphs not preloaded yet, frame left unmodified");
            return BlitOutcome::NotReady;
        };

        if cache.cell_width() != cell_width || cache.cell_height() != cell_height {
            debug!(
                cached_width = cache.cell_width(),
                cached_height = cache.cell_height(),
                cell_width,
                cell_height,
                "Watermark cell size differs from preloaded cache"
            );
            return BlitOutcome::CellMismatch;
        }

        blit_text(cache, buffer, width, height, text, origin_x, origin_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_timestamp_text_format() {
        let time = NaiveTime::from_hms_opt(7, 5, 9).unwrap();
        assert_eq!(timestamp_text(&time), "Time: 07:05:09");
    }

    #[test]
    fn test_cache_covers_alphabet() {
        let cache = GlyphCache::build(20, 30);
        let distinct: std::collections::HashSet<char> = ALPHABET.chars().collect();
        assert_eq!(cache.len(), distinct.len());
        assert!(cache.get('X').is_none());
        assert_eq!(cache.advance('X'), 20);
    }

    #[test]
    fn test_blit_before_preload_is_noop() {
        let renderer = WatermarkRenderer::new();
        let mut frame = vec![7u8; 200 * 60 * 3 / 2];
        let before = frame.clone();

        let outcome = renderer.blit(&mut frame, 200, 60, "Time: 00:00:00", 20, 30, 10, 10);
        assert_eq!(outcome, BlitOutcome::NotReady);
        assert_eq!(frame, before);
    }

    #[test]
    fn test_blit_out_of_bounds_is_noop() {
        let renderer = WatermarkRenderer::new();
        assert!(renderer.preload(20, 30));
        let mut frame = vec![7u8; 64 * 32 * 3 / 2];
        let before = frame.clone();

        let outcome = renderer.blit(&mut frame, 64, 32, "Time: 00:00:00", 20, 30, 10, 10);
        assert_eq!(outcome, BlitOutcome::OutOfBounds);
        assert_eq!(frame, before);
    }

    #[test]
    fn test_blit_leaves_chroma_untouched() {
        let renderer = WatermarkRenderer::new();
        renderer.preload(20, 30);
        let (w, h) = (200usize, 60usize);
        let mut frame = vec![90u8; w * h * 3 / 2];

        let outcome = renderer.blit(&mut frame, 200, 60, "12:34", 20, 30, 11, 11);
        assert_eq!(outcome, BlitOutcome::Drawn { skipped: 0 });
        assert!(frame[w * h..].iter().all(|&b| b == 90));
        // Origin snapped to (10, 10)
        assert_eq!(frame[10 * w + 10], BACKGROUND_LUMA);
        assert_eq!(frame[10 * w + 9], 90);
    }

    #[test]
    fn test_missing_glyph_still_advances() {
        let renderer = WatermarkRenderer::new();
        renderer.preload(20, 30);
        let mut frame = vec![0u8; 300 * 60];

        let outcome = renderer.blit(&mut frame, 300, 60, "1X1", 20, 30, 0, 0);
        assert_eq!(outcome, BlitOutcome::Drawn { skipped: 1 });
    }

    #[test]
    fn test_cell_mismatch_is_noop() {
        let renderer = WatermarkRenderer::new();
        renderer.preload(20, 30);
        let mut frame = vec![3u8; 200 * 60];
        let outcome = renderer.blit(&mut frame, 200, 60, "00", 16, 24, 0, 0);
        assert_eq!(outcome, BlitOutcome::CellMismatch);
        assert!(frame.iter().all(|&b| b == 3));
    }

    #[test]
    fn test_second_preload_keeps_first_cache() {
        let renderer = WatermarkRenderer::new();
        assert!(renderer.preload(20, 30));
        assert!(!renderer.preload(10, 12));
        assert_eq!(renderer.cache().unwrap().cell_width(), 20);
    }

    #[test]
    fn test_spawn_preload_publishes_cache() {
        let renderer = WatermarkRenderer::new();
        if let Some(handle) = renderer.spawn_preload(20, 30) {
            handle.join().unwrap();
        }
        assert!(renderer.is_ready());
    }
}
