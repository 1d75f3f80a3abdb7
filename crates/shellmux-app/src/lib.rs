//! shellmux-app: ties sessions, history and focus together behind a single
//! [`App`] controller that a presentation layer drives with [`Action`]s.

mod app;
mod clipboard;
pub mod config;
mod error;
pub mod focus;
pub mod input;
pub mod view;

pub use app::{App, Control};
pub use clipboard::SystemClipboard;
pub use config::Config;
pub use error::{AppError, ConfigError};
pub use focus::{Focus, FocusStack};
pub use input::{Action, Key};
pub use view::{LineView, SearchView, SessionView, TabState, TabView};
