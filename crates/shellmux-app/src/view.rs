//! Snapshots handed to the presentation layer.
//!
//! Everything here is `Serialize` so a renderer in another process can take
//! it as tagged JSON.

use serde::Serialize;
use shellmux_history::ActiveSearch;
use shellmux_pty::{SessionId, TabKind, TabStatus};
use shellmux_scrollback::VisibleLine;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TabView {
    pub id: SessionId,
    pub name: String,
    pub remote: bool,
    pub active: bool,
    pub state: TabState,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum TabState {
    Running,
    Exited { code: Option<u32> },
    /// Drawn as an error indicator on the tab.
    Failed { error: String },
}

impl From<TabStatus> for TabState {
    fn from(status: TabStatus) -> Self {
        match status {
            TabStatus::Running => TabState::Running,
            TabStatus::Exited(code) => TabState::Exited { code },
            TabStatus::Failed(error) => TabState::Failed { error },
        }
    }
}

pub(crate) fn is_remote(kind: TabKind) -> bool {
    kind == TabKind::Remote
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LineView {
    pub text: String,
    pub selected: bool,
}

impl From<VisibleLine<'_>> for LineView {
    fn from(line: VisibleLine<'_>) -> Self {
        Self {
            text: line.text.to_string(),
            selected: line.selected,
        }
    }
}

/// What to draw in the active tab's body.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SessionView {
    Lines {
        lines: Vec<LineView>,
        scroll_offset: usize,
        selecting: bool,
    },
    Error {
        message: String,
    },
    /// No session yet (no tabs, or the session is still being created).
    Starting,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SearchView {
    pub query: String,
    pub matches: Vec<String>,
    pub selected: usize,
}

impl From<&ActiveSearch> for SearchView {
    fn from(search: &ActiveSearch) -> Self {
        Self {
            query: search.query.clone(),
            matches: search.matches.iter().map(|hit| hit.entry.clone()).collect(),
            selected: search.selected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_view_is_tagged() {
        let view = SessionView::Error {
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["message"], "boom");

        let json = serde_json::to_value(&SessionView::Starting).unwrap();
        assert_eq!(json["type"], "Starting");
    }

    #[test]
    fn test_tab_state_from_status() {
        assert_eq!(TabState::from(TabStatus::Running), TabState::Running);
        assert_eq!(
            TabState::from(TabStatus::Exited(Some(2))),
            TabState::Exited { code: Some(2) }
        );
        let json = serde_json::to_value(TabState::from(TabStatus::Failed("no pty".into()))).unwrap();
        assert_eq!(json["type"], "Failed");
        assert_eq!(json["error"], "no pty");
    }
}
