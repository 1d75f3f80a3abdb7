//! System clipboard backed by arboard.

use shellmux_scrollback::{ClipboardError, ClipboardSink};

/// The OS clipboard, opened on first use.
///
/// The last copied text is kept in-process as well, so paste still works
/// where no system clipboard is reachable (headless sessions, CI).
#[derive(Default)]
pub struct SystemClipboard {
    system: Option<arboard::Clipboard>,
    internal: Option<String>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn system(&mut self) -> Result<&mut arboard::Clipboard, ClipboardError> {
        if self.system.is_none() {
            let clipboard = arboard::Clipboard::new()
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
            self.system = Some(clipboard);
        }
        self.system
            .as_mut()
            .ok_or_else(|| ClipboardError::Unavailable("clipboard not initialized".to_string()))
    }
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.internal = Some(text.to_string());
        let result = self
            .system()?
            .set_text(text.to_string())
            .map_err(|e| ClipboardError::Unavailable(e.to_string()));
        if result.is_err() {
            // A stale X11/Wayland connection is reopened on next use.
            self.system = None;
        }
        result
    }

    fn get_text(&mut self) -> Result<String, ClipboardError> {
        match self.system().and_then(|cb| {
            cb.get_text()
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))
        }) {
            Ok(text) => Ok(text),
            Err(e) => {
                log::debug!("system clipboard read failed: {e}");
                self.internal.clone().ok_or(e)
            }
        }
    }
}
