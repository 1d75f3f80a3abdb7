use serde::Serialize;

/// Who consumes key presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Focus {
    Terminal,
    Selection,
    HistorySearch,
}

/// Input-focus stack. `Terminal` is the permanent base; modal layers are
/// pushed on top and the topmost one receives keys.
#[derive(Debug, Default)]
pub struct FocusStack {
    layers: Vec<Focus>,
}

impl FocusStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Focus {
        self.layers.last().copied().unwrap_or(Focus::Terminal)
    }

    /// Raise `focus` to the top. Pushing `Terminal` is a no-op.
    pub fn push(&mut self, focus: Focus) {
        if focus == Focus::Terminal {
            return;
        }
        self.layers.retain(|&f| f != focus);
        self.layers.push(focus);
    }

    /// Drop the topmost modal layer. The base is never popped.
    pub fn pop(&mut self) -> Option<Focus> {
        self.layers.pop()
    }

    pub fn remove(&mut self, focus: Focus) {
        self.layers.retain(|&f| f != focus);
    }

    pub fn contains(&self, focus: Focus) -> bool {
        focus == Focus::Terminal || self.layers.contains(&focus)
    }

    /// Number of layers including the base.
    pub fn depth(&self) -> usize {
        self.layers.len() + 1
    }
}
