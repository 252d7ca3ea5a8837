// SPDX-License-Identifier: GPL-3.0-only

//! Frame-processing thread and its single-slot mailbox
//!
//! The camera subsystem offers frames into a [`LatestFrameSlot`]; a dedicated
//! thread takes them one at a time and runs the whole pipeline synchronously.
//! The slot holds at most one frame, so a slow pass never builds a backlog:
//! an undelivered frame is replaced by the next one and counted as dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the frame handler wants after processing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Continue,
    Stop,
}

/// "Keep only the newest" hand-off between the producer and the frame thread
#[derive(Debug)]
pub struct LatestFrameSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
    dropped: AtomicU64,
}

#[derive(Debug)]
struct SlotState<T> {
    pending: Option<T>,
    closed: bool,
}

impl<T> Default for LatestFrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Offer a frame, replacing any frame that has not been taken yet
    ///
    /// Returns `false` when the slot is closed and the frame was discarded.
    pub fn offer(&self, frame: T) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return false;
        }
        if state.pending.replace(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Take the pending frame, waiting up to `timeout` for one to arrive
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.pending.is_none() && !s.closed)
            .unwrap_or_else(|e| e.into_inner());
        state.pending.take()
    }

    /// Stop accepting frames and wake any waiting consumer
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Frames replaced before the consumer took them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Dedicated thread draining a [`LatestFrameSlot`]
///
/// ```ignore
/// let slot = Arc::new(LatestFrameSlot::new());
/// let mut processor = FrameProcessor::spawn("recorder", Arc::clone(&slot), move |frame: FrameData| {
///     recorder.process_frame(&frame.view());
///     FrameAction::Continue
/// });
/// slot.offer(frame);
/// processor.finish();
/// ```
pub struct FrameProcessor<T> {
    name: String,
    slot: Arc<LatestFrameSlot<T>>,
    worker: Option<JoinHandle<()>>,
    abort: Arc<AtomicBool>,
    handled: Arc<AtomicU64>,
}

impl<T: Send + 'static> FrameProcessor<T> {
    /// Start the thread; `handler` runs once per delivered frame
    ///
    /// The thread ends when the handler returns [`FrameAction::Stop`], when
    /// the slot is closed and drained, or on [`abort`](Self::abort). A frame
    /// already taken is always handled to completion.
    pub fn spawn<F>(name: &str, slot: Arc<LatestFrameSlot<T>>, mut handler: F) -> Self
    where
        F: FnMut(T) -> FrameAction + Send + 'static,
    {
        use crate::constants::timing::FRAME_WAIT_INTERVAL;

        let abort = Arc::new(AtomicBool::new(false));
        let handled = Arc::new(AtomicU64::new(0));
        let worker = {
            let slot = Arc::clone(&slot);
            let abort = Arc::clone(&abort);
            let handled = Arc::clone(&handled);
            let name = name.to_string();
            thread::Builder::new()
                .name(format!("frames-{}", name))
                .spawn(move || {
                    debug!(name = %name, "Frame thread started");
                    while !abort.load(Ordering::Acquire) {
                        let Some(frame) = slot.take_timeout(FRAME_WAIT_INTERVAL) else {
                            if slot.is_closed() {
                                break;
                            }
                            continue;
                        };
                        handled.fetch_add(1, Ordering::Relaxed);
                        if handler(frame) == FrameAction::Stop {
                            debug!(name = %name, "Handler asked to stop");
                            break;
                        }
                    }
                    info!(
                        name = %name,
                        frames = handled.load(Ordering::Relaxed),
                        dropped = slot.dropped(),
                        "Frame thread finished"
                    );
                })
        };

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Could not start frame thread");
                slot.close();
                None
            }
        };

        Self {
            name: name.to_string(),
            slot,
            worker,
            abort,
            handled,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Frames passed to the handler so far
    pub fn frames_handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Close the slot, let the thread handle what is pending, then join
    pub fn finish(&mut self) {
        self.slot.close();
        self.wait();
    }

    /// Stop after the frame currently being handled, dropping anything pending
    pub fn abort(&mut self) {
        self.abort.store(true, Ordering::Release);
        self.slot.close();
        self.wait();
    }

    fn wait(&mut self) {
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            warn!(name = %self.name, "Frame thread panicked");
        }
    }
}

impl<T> Drop for FrameProcessor<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.abort.store(true, Ordering::Release);
            self.slot.close();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_keeps_only_latest() {
        let slot = LatestFrameSlot::new();
        assert!(slot.offer(1));
        assert!(slot.offer(2));
        assert!(slot.offer(3));

        assert_eq!(slot.take_timeout(Duration::from_millis(1)), Some(3));
        assert_eq!(slot.dropped(), 2);
        assert_eq!(slot.take_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_closed_slot_rejects_frames() {
        let slot = LatestFrameSlot::new();
        slot.close();
        assert!(!slot.offer(7));
        assert_eq!(slot.take_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_handler_stop_ends_thread() {
        let slot = Arc::new(LatestFrameSlot::new());
        let mut processor =
            FrameProcessor::spawn("test-stop", Arc::clone(&slot), |_frame: u32| FrameAction::Stop);

        slot.offer(1);
        for _ in 0..100 {
            if !processor.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!processor.is_running());
        assert_eq!(processor.frames_handled(), 1);
        processor.finish();
    }

    #[test]
    fn test_frame_processor_drains_until_closed() {
        let slot = Arc::new(LatestFrameSlot::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let mut processor = FrameProcessor::spawn("test-frames", Arc::clone(&slot), move |frame: u32| {
            seen_clone.lock().unwrap().push(frame);
            FrameAction::Continue
        });

        slot.offer(1);
        // Wait until the first frame has been consumed before sending the next
        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        slot.offer(2);
        thread::sleep(Duration::from_millis(20));
        processor.finish();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&1));
        assert_eq!(seen.last(), Some(&2));
        assert!(!processor.is_running());
    }

    #[test]
    fn test_abort_closes_slot() {
        let slot = Arc::new(LatestFrameSlot::new());
        let mut processor =
            FrameProcessor::spawn("test-abort", Arc::clone(&slot), |_frame: u32| FrameAction::Continue);
        processor.abort();
        assert!(slot.is_closed());
        assert!(!slot.offer(5));
    }
}
