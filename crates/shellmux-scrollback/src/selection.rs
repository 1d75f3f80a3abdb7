/// Line selection over a scrollback buffer.
///
/// The anchor is where selection started; the cursor is what the user
/// moves. The selected range always spans both, in either order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub anchor: usize,
    pub cursor: usize,
}

impl Selection {
    pub fn new(line: usize) -> Self {
        Self {
            anchor: line,
            cursor: line,
        }
    }

    /// Inclusive `(start, end)` line range.
    pub fn range(&self) -> (usize, usize) {
        (self.anchor.min(self.cursor), self.anchor.max(self.cursor))
    }

    pub fn contains(&self, line: usize) -> bool {
        let (start, end) = self.range();
        line >= start && line <= end
    }

    /// Shift both ends after `evicted` lines were dropped from the front,
    /// then clamp into a buffer of `len` lines.
    pub(crate) fn shift(&mut self, evicted: usize, len: usize) {
        let last = len.saturating_sub(1);
        self.anchor = self.anchor.saturating_sub(evicted).min(last);
        self.cursor = self.cursor.saturating_sub(evicted).min(last);
    }
}

/// A cursor movement while in selection mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMove {
    /// Relative move; negative is up.
    By(isize),
    PageUp,
    PageDown,
    Start,
    End,
    /// Jump to an absolute line index.
    To(usize),
}
