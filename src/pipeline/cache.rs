//! Single-slot, last-value-wins cache for the secondary stream

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;

use crate::FrameBuffer;

/// Holds the most recent secondary frame.
///
/// Each `put` replaces the slot whether or not the previous frame was ever
/// read, so memory stays at one frame regardless of producer rate. The lock
/// guards only an `Arc` swap or clone; no pixel work happens under it.
pub struct StreamCache {
    slot: Mutex<Slot>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Slot {
    frame: Option<Arc<FrameBuffer>>,
    read: bool,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_overwritten: AtomicUsize,
}

/// Snapshot of [`StreamCache`] counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub frames_written: usize,
    pub frames_read: usize,
    /// Frames replaced before any reader saw them
    pub frames_overwritten: usize,
}

impl StreamCache {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the cached frame
    pub fn put(&self, frame: FrameBuffer) {
        let frame = Arc::new(frame);

        let (previous, unread) = {
            let mut slot = self.lock();
            let unread = slot.frame.is_some() && !slot.read;
            slot.read = false;
            (slot.frame.replace(frame), unread)
        };

        if unread {
            self.stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        // previous frame is released here, outside the lock
        drop(previous);
    }

    /// Consumer: snapshot of the latest frame, `None` until the first `put`
    pub fn get(&self) -> Option<Arc<FrameBuffer>> {
        let frame = {
            let mut slot = self.lock();
            if slot.frame.is_some() {
                slot.read = true;
            }
            slot.frame.clone()
        };

        if frame.is_some() {
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Forget the cached frame; the next `get` returns `None`
    pub fn reset(&self) {
        let previous = std::mem::take(&mut *self.lock());
        drop(previous);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frame.is_none()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_read: self.stats.frames_read.load(Ordering::Relaxed),
            frames_overwritten: self.stats.frames_overwritten.load(Ordering::Relaxed),
        }
    }

    // A panic while holding the lock cannot leave the slot half-written:
    // every critical section is a single field assignment.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StreamCache {
    fn default() -> Self {
        Self::new()
    }
}
