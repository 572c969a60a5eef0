/// Window-focus and unseen-message tracking.
///
/// Purely cosmetic: feeds the unseen-count/title signal. Counts only while
/// the window lacks focus; regaining focus resets the counter.
#[derive(Debug)]
pub struct FocusTracker {
    focused: bool,
    unseen: u32,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self {
            focused: true,
            unseen: 0,
        }
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    pub fn unseen(&self) -> u32 {
        self.unseen
    }

    /// Returns the new unseen count if the title signal needs updating.
    pub fn set_focus(&mut self, focused: bool) -> Option<u32> {
        self.focused = focused;
        if focused && self.unseen > 0 {
            self.unseen = 0;
            return Some(0);
        }
        None
    }

    /// Record `count` messages arriving from other senders. Returns the new
    /// unseen count if the title signal needs updating.
    pub fn record_incoming(&mut self, count: u32) -> Option<u32> {
        if self.focused || count == 0 {
            return None;
        }
        self.unseen = self.unseen.saturating_add(count);
        Some(self.unseen)
    }

    /// Leaving a room discards the counter without signalling.
    pub fn reset(&mut self) {
        self.unseen = 0;
    }
}
