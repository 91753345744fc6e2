//! Clock page replacement for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clock (second-chance) replacement.
///
/// Reference bits are set on every access; the clock hand clears them and
/// evicts the first unreferenced frame the caller deems evictable. Whether a
/// frame may be evicted is decided by the caller (the pool checks the pin
/// count), so the replacer keeps no evictable set of its own.
pub struct ClockReplacer {
    /// Reference bits for each frame.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer covering `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            hand: Mutex::new(0),
        }
    }

    /// Returns the number of frames covered.
    pub fn capacity(&self) -> usize {
        self.reference_bits.len()
    }

    /// Records that the given frame was accessed.
    #[inline]
    pub fn record_access(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(true, Ordering::Relaxed);
        }
    }

    /// Clears the state kept for a frame that left the pool.
    #[inline]
    pub fn forget(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(false, Ordering::Relaxed);
        }
    }

    /// Selects a victim among the frames for which `is_evictable` holds.
    ///
    /// Makes at most two full rotations: the first pass gives referenced
    /// frames a second chance, the second finds one with its bit cleared.
    /// Returns None if no frame is evictable.
    pub fn evict<F>(&self, is_evictable: F) -> Option<FrameId>
    where
        F: Fn(FrameId) -> bool,
    {
        let num_frames = self.reference_bits.len();
        if num_frames == 0 {
            return None;
        }

        let mut hand = self.hand.lock();
        let mut seen_evictable = false;

        for _ in 0..(2 * num_frames) {
            let pos = *hand;
            *hand = (pos + 1) % num_frames;

            let frame_id = FrameId(pos as u32);
            if !is_evictable(frame_id) {
                continue;
            }
            seen_evictable = true;

            if self.reference_bits[pos].swap(false, Ordering::Relaxed) {
                // Second chance: bit was set, now cleared.
                continue;
            }
            return Some(frame_id);
        }

        if !seen_evictable {
            return None;
        }

        // Every evictable frame kept getting referenced; take the first one.
        for pos in 0..num_frames {
            let frame_id = FrameId(pos as u32);
            if is_evictable(frame_id) {
                self.reference_bits[pos].store(false, Ordering::Relaxed);
                return Some(frame_id);
            }
        }
        None
    }
}
