//! Clipboard capability injected into copy operations.
//!
//! The buffer never reaches for a process-wide clipboard; callers hand it
//! whatever sink they own (the system clipboard in the app, a
//! [`MemoryClipboard`] in tests and headless runs).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
}

/// String-in / string-out clipboard service.
pub trait ClipboardSink {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
    fn get_text(&mut self) -> Result<String, ClipboardError>;
}

/// In-process clipboard.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    contents: Option<String>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<&str> {
        self.contents.as_deref()
    }
}

impl ClipboardSink for MemoryClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.contents = Some(text.to_string());
        Ok(())
    }

    fn get_text(&mut self) -> Result<String, ClipboardError> {
        self.contents
            .clone()
            .ok_or_else(|| ClipboardError::Unavailable("clipboard is empty".to_string()))
    }
}
