//! shellmux-history: shared command history and its search overlay.
//!
//! [`HistoryStore`] is the persisted, bounded list of commands shared by
//! every session. [`HistorySearch`] is the single-owner state machine behind
//! the interactive reverse search.

pub mod codec;
pub mod search;
pub mod store;

pub use search::{ActiveSearch, HistorySearch, SearchOutcome, SearchState};
pub use store::{HistoryError, HistoryStore, SearchHit, DEFAULT_HISTORY_SIZE};
