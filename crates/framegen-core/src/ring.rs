//! Fixed-depth ring of in-flight present slots.

/// Number of present cycles that may be in flight per surface.
pub const RING_DEPTH: usize = 8;

/// Ring of per-present slots indexed by `frame % RING_DEPTH`.
///
/// The ring only tracks ownership and reuse. Whoever reuses a slot must make
/// sure the GPU is done with the previous occupant first; [`FrameRing::record_stall`]
/// counts how often that required waiting.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<Option<T>>,
    frame: u64,
    stalls: u64,
}

impl<T> Default for FrameRing<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameRing<T> {
    pub fn new() -> Self {
        Self {
            slots: (0..RING_DEPTH).map(|_| None).collect(),
            frame: 0,
            stalls: 0,
        }
    }

    /// Number of completed present cycles.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn current_index(&self) -> usize {
        slot_index(self.frame)
    }

    /// Slot used by the previous present, `None` before the first one finished.
    pub fn previous_index(&self) -> Option<usize> {
        self.frame.checked_sub(1).map(slot_index)
    }

    /// History image written by the current present (alternates 0, 1).
    pub fn history_index(&self) -> usize {
        (self.frame % 2) as usize
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    pub fn previous(&self) -> Option<&T> {
        self.get(self.previous_index()?)
    }

    /// Remove the occupant of the current slot so it can be retired.
    pub fn take_current(&mut self) -> Option<T> {
        let index = self.current_index();
        self.slots[index].take()
    }

    /// Place `slot` in the current position and advance to the next frame.
    pub fn commit(&mut self, slot: T) {
        let index = self.current_index();
        self.slots[index] = Some(slot);
        self.frame += 1;
    }

    pub fn record_stall(&mut self) {
        self.stalls += 1;
    }

    /// Times a slot was still in use by the GPU when its turn came again.
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    /// Remove every occupant, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let start = self.current_index();
        (0..RING_DEPTH)
            .filter_map(|offset| self.slots[(start + offset) % RING_DEPTH].take())
            .collect()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

pub fn slot_index(frame: u64) -> usize {
    (frame % RING_DEPTH as u64) as usize
}
