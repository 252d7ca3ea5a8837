// SPDX-License-Identifier: MPL-2.0

//! Camera frame plumbing
//!
//! ```text
//! ┌─────────────┐ offer  ┌─────────────────┐ take  ┌──────────────────┐
//! │ FrameSource │ ─────▶ │ LatestFrameSlot │ ────▶ │ frame thread     │
//! │ (sensor)    │        │ (1 frame max)   │       │ convert/encode   │
//! └─────────────┘        └─────────────────┘       └──────────────────┘
//! ```

pub mod frame_loop;
pub mod test_pattern;
pub mod types;

pub use frame_loop::{FrameAction, FrameProcessor, LatestFrameSlot};
pub use test_pattern::TestPatternSource;
pub use types::*;

/// Supplier of raw sensor frames
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Option<FrameData>;

    /// Nominal spacing between frames in microseconds
    fn frame_interval_us(&self) -> i64;
}
