//! shellmux-scrollback: per-session line store for shellmux.
//!
//! Raw PTY output is treated as line-oriented text. Bytes go through a VTE
//! parser only to decode UTF-8 across read boundaries and to drop escape
//! sequences; nothing is emulated.
//!
//! - [`ScrollbackBuffer`]: bounded line store with a scrollable view and
//!   anchor-relative line selection.
//! - [`ClipboardSink`]: the clipboard capability the buffer copies into.

pub mod buffer;
pub mod clipboard;
mod decoder;
pub mod selection;

pub use buffer::{ScrollbackBuffer, VisibleLine, DEFAULT_CAPACITY};
pub use clipboard::{ClipboardError, ClipboardSink, MemoryClipboard};
pub use selection::{Selection, SelectionMove};
