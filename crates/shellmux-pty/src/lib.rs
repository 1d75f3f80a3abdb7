//! shellmux-pty: PTY-backed shell sessions and the tab registry over them.
//!
//! # Architecture
//!
//! - [`PtyHandle`]: low-level PTY process management (spawn, write, resize,
//!   terminate).
//! - [`PtySession`]: a `PtyHandle` plus a read-loop thread feeding a
//!   [`ScrollbackBuffer`](shellmux_scrollback::ScrollbackBuffer).
//! - [`SessionRegistry`]: ordered tabs with an active index, keyed to
//!   sessions by stable id.

pub mod error;
mod io_thread;
pub mod pty;
pub mod registry;
pub mod session;

pub use error::SessionError;
pub use pty::{PtyHandle, PtySize, PtyWriter, SpawnCommand};
pub use registry::{SessionRegistry, Tab, TabKind, TabStatus};
pub use session::{EventSender, PtySession, SessionEvent, SessionId};
