use std::collections::VecDeque;

use crate::clipboard::{ClipboardError, ClipboardSink};
use crate::decoder::LineDecoder;
use crate::selection::{Selection, SelectionMove};

/// Default number of retained lines per session.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// One row of the visible window handed to the presentation layer.
///
/// Lines are not wrapped or truncated; the caller clips to its width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibleLine<'a> {
    pub text: &'a str,
    pub selected: bool,
}

/// Bounded, line-oriented scrollback for one PTY session.
///
/// Written only by the session's read loop (through [`ingest`](Self::ingest))
/// and read by the presentation layer. Selection state is driven by the key
/// handler while selection mode is active.
pub struct ScrollbackBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    /// Whether the last line still accepts text.
    line_open: bool,
    decoder: LineDecoder,
    /// Lines dropped from the front since creation.
    evicted: u64,
    /// Lines scrolled up from the bottom; 0 follows new output.
    scroll_offset: usize,
    viewport_height: usize,
    selection: Option<Selection>,
}

impl ScrollbackBuffer {
    /// Create an empty buffer retaining at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            line_open: false,
            decoder: LineDecoder::new(),
            evicted: 0,
            scroll_offset: 0,
            viewport_height: 0,
            selection: None,
        }
    }

    /// Append a chunk of raw PTY output.
    ///
    /// Text without a leading newline continues the current open line, so
    /// a line split across two reads ends up as one entry. Each newline
    /// terminates a line. The view jumps back to the newest output unless
    /// selection mode is active.
    pub fn ingest(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.decoder.feed(&mut self.lines, &mut self.line_open, bytes);
        self.truncate_to_capacity();
        if self.selection.is_none() {
            self.scroll_offset = 0;
        }
    }

    /// Evict the oldest lines until the buffer fits its capacity.
    pub fn truncate_to_capacity(&mut self) {
        let excess = self.lines.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        self.lines.drain(..excess);
        self.evicted += excess as u64;

        let len = self.lines.len();
        if let Some(selection) = self.selection.as_mut() {
            selection.shift(excess, len);
        }
        self.clamp_scroll();
    }

    /// Drop every line and leave selection mode.
    pub fn clear(&mut self) {
        self.evicted += self.lines.len() as u64;
        self.lines.clear();
        self.line_open = false;
        self.selection = None;
        self.scroll_offset = 0;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Number of lines evicted so far. `evicted() + i` is the absolute
    /// number of line `i`.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Number of lines that have seen their terminating newline.
    pub fn completed_len(&self) -> usize {
        if self.line_open {
            self.lines.len().saturating_sub(1)
        } else {
            self.lines.len()
        }
    }

    // ── View ────────────────────────────────────────────────────────────

    /// Record the height the presentation layer is drawing at. Used for
    /// page moves and to keep the selection cursor on screen.
    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height;
        self.clamp_scroll();
    }

    pub fn viewport_height(&self) -> usize {
        self.viewport_height
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(lines).min(self.max_scroll());
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    /// The lines to draw for a viewport `height` rows tall.
    ///
    /// Honors the scroll position; in selection mode the window follows the
    /// selection cursor.
    pub fn visible_window(&self, height: usize) -> Vec<VisibleLine<'_>> {
        if height == 0 {
            return Vec::new();
        }

        let mut top = self.view_top(height);
        if let Some(selection) = self.selection {
            if selection.cursor < top {
                top = selection.cursor;
            } else if selection.cursor >= top + height {
                top = selection.cursor + 1 - height;
            }
        }

        self.lines
            .iter()
            .enumerate()
            .skip(top)
            .take(height)
            .map(|(index, text)| VisibleLine {
                text: text.as_str(),
                selected: self.selection.is_some_and(|s| s.contains(index)),
            })
            .collect()
    }

    fn view_top(&self, height: usize) -> usize {
        let bottom = self.lines.len().saturating_sub(height);
        bottom.saturating_sub(self.scroll_offset)
    }

    fn max_scroll(&self) -> usize {
        self.lines.len().saturating_sub(self.viewport_height)
    }

    fn clamp_scroll(&mut self) {
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
    }

    // ── Selection ───────────────────────────────────────────────────────

    pub fn is_selecting(&self) -> bool {
        self.selection.is_some()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    /// Inclusive selected range, or `None` outside selection mode or when
    /// there is nothing to select.
    pub fn selection_range(&self) -> Option<(usize, usize)> {
        if self.lines.is_empty() {
            return None;
        }
        self.selection.map(|s| s.range())
    }

    /// Start selecting at the line currently at the top of the view.
    pub fn enter_selection_mode(&mut self) {
        let last = self.lines.len().saturating_sub(1);
        let top = self.view_top(self.viewport_height).min(last);
        self.selection = Some(Selection::new(top));
    }

    /// Leave selection mode without copying.
    pub fn exit_selection_mode(&mut self) {
        self.selection = None;
    }

    /// Move the selection cursor. The range is recomputed from the original
    /// anchor, so moving back past the anchor flips the range around it.
    pub fn move_selection_cursor(&mut self, movement: SelectionMove) {
        let last = self.lines.len().saturating_sub(1);
        let page = self.viewport_height.max(1);
        let Some(selection) = self.selection.as_mut() else {
            return;
        };

        let cursor = selection.cursor;
        let target = match movement {
            SelectionMove::By(delta) if delta < 0 => cursor.saturating_sub(delta.unsigned_abs()),
            SelectionMove::By(delta) => cursor.saturating_add(delta as usize),
            SelectionMove::PageUp => cursor.saturating_sub(page),
            SelectionMove::PageDown => cursor.saturating_add(page),
            SelectionMove::Start => 0,
            SelectionMove::End => last,
            SelectionMove::To(line) => line,
        };
        selection.cursor = target.min(last);
        self.follow_cursor();
    }

    /// Select the whole buffer.
    pub fn select_all(&mut self) {
        let last = self.lines.len().saturating_sub(1);
        self.selection = Some(Selection {
            anchor: 0,
            cursor: last,
        });
        self.follow_cursor();
    }

    /// The selected lines joined with `\n`.
    pub fn selected_text(&self) -> Option<String> {
        let (start, end) = self.selection_range()?;
        Some(join_lines(self.lines.range(start..=end)))
    }

    /// Copy the selected lines into `sink` and leave selection mode.
    ///
    /// Selection mode is left even if the sink fails.
    pub fn copy_selection(&mut self, sink: &mut dyn ClipboardSink) -> Result<String, ClipboardError> {
        let text = self.selected_text();
        self.selection = None;
        match text {
            Some(text) => {
                sink.set_text(&text)?;
                log::debug!("copied {} bytes of selection", text.len());
                Ok(text)
            }
            None => Ok(String::new()),
        }
    }

    /// Copy every line into `sink`, regardless of selection mode.
    pub fn copy_all(&self, sink: &mut dyn ClipboardSink) -> Result<String, ClipboardError> {
        if self.lines.is_empty() {
            return Ok(String::new());
        }
        let text = join_lines(self.lines.iter());
        sink.set_text(&text)?;
        Ok(text)
    }

    fn follow_cursor(&mut self) {
        let height = self.viewport_height;
        let Some(selection) = self.selection else {
            return;
        };
        if height == 0 {
            return;
        }

        let bottom = self.lines.len().saturating_sub(height);
        let top = self.view_top(height);
        if selection.cursor < top {
            self.scroll_offset = bottom.saturating_sub(selection.cursor);
        } else if selection.cursor >= top + height {
            self.scroll_offset = bottom.saturating_sub(selection.cursor + 1 - height);
        }
    }
}

impl Default for ScrollbackBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a String>) -> String {
    lines.map(String::as_str).collect::<Vec<_>>().join("\n")
}
