use linked_hash_map::LinkedHashMap;
use log::warn;

use crate::common::types::FrameId;

/// LRU page replacement policy over evictable frames.
///
/// Frames enter via `unpin` (pin count dropped to zero) and leave via `pin`
/// or `victim`. Insertion order is recency order: the front of the map is the
/// least recently unpinned frame. The map keys give O(1) `pin`.
///
/// The replacer carries no lock of its own; the buffer pool's latch guards it.
pub struct LruReplacer {
    frames: LinkedHashMap<FrameId, ()>,
    num_frames: usize,
}

impl LruReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: LinkedHashMap::with_capacity(num_frames),
            num_frames,
        }
    }

    /// Remove and return the oldest evictable frame, if any.
    pub fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Mark a frame as in use: remove it from the evictable set.
    /// No-op when the frame is not present.
    pub fn pin(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    /// Mark a frame as evictable, placing it at the most-recent end.
    /// A frame that is already evictable stays where it is.
    pub fn unpin(&mut self, frame_id: FrameId) {
        if self.frames.contains_key(&frame_id) {
            return;
        }
        if self.frames.len() >= self.num_frames {
            warn!(
                "lru replacer at capacity ({}), dropping unpin of frame {}",
                self.num_frames, frame_id
            );
            return;
        }
        self.frames.insert(frame_id, ());
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.frames.len()
    }
}
