//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A page replacement algorithm.
///
/// The replacer does not track pin state itself; `evict` consults the
/// caller-supplied predicate so eviction decisions always see the pool's
/// current pin counts.
pub trait Replacer: Send + Sync {
    /// Records that a frame was accessed, granting it a second chance.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim among frames for which `evictable` returns true.
    fn evict(&self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets any state held for a frame.
    fn remove(&self, frame_id: FrameId);
}

/// Clock (second-chance) replacement.
///
/// A sweep hand cycles over the frames; an evictable frame with its
/// reference bit set gets the bit cleared and is skipped once, so recently
/// used frames survive one full rotation.
pub struct ClockReplacer {
    /// Number of frames under management.
    num_frames: usize,
    /// Per-frame reference bits.
    reference_bits: Vec<AtomicBool>,
    /// Current sweep position.
    hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a replacer covering `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            hand: Mutex::new(0),
        }
    }

    /// Returns the number of frames under management.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        if self.num_frames == 0 {
            return None;
        }

        let mut hand = self.hand.lock();
        // Two rotations: the first clears reference bits, the second catches
        // frames that were spared on the first pass.
        for _ in 0..(2 * self.num_frames) {
            let pos = *hand;
            *hand = (pos + 1) % self.num_frames;

            let frame_id = FrameId(pos as u32);
            if !evictable(frame_id) {
                continue;
            }
            if self.reference_bits[pos].swap(false, Ordering::Relaxed) {
                continue;
            }
            return Some(frame_id);
        }
        None
    }

    fn remove(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(false, Ordering::Relaxed);
        }
    }
}
