//! Interactive reverse history search (the `Ctrl-R` overlay).

use crate::store::{HistoryStore, SearchHit};

/// Rows the overlay spends on its frame, prompt and hints.
const CHROME_ROWS: usize = 4;

/// Match cap used while the viewport is unknown or too small for chrome.
const FALLBACK_CAP: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSearch {
    pub query: String,
    /// Most recent first, capped to what fits in the viewport.
    pub matches: Vec<SearchHit>,
    pub selected: usize,
    /// History position the search is anchored at.
    pub origin: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SearchState {
    #[default]
    Hidden,
    Active(ActiveSearch),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Selected { entry: String, position: usize },
    Dismissed,
}

#[derive(Debug, Default)]
pub struct HistorySearch {
    state: SearchState,
    viewport_height: usize,
}

impl HistorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn active(&self) -> Option<&ActiveSearch> {
        match &self.state {
            SearchState::Active(search) => Some(search),
            SearchState::Hidden => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SearchState::Active(_))
    }

    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height;
        let cap = self.cap();
        if let SearchState::Active(search) = &mut self.state {
            search.matches.truncate(cap);
            search.selected = search.selected.min(search.matches.len().saturating_sub(1));
        }
    }

    /// Maximum number of matches shown.
    pub fn cap(&self) -> usize {
        if self.viewport_height > CHROME_ROWS {
            self.viewport_height - CHROME_ROWS
        } else {
            FALLBACK_CAP
        }
    }

    /// Show the overlay with an empty query.
    pub fn open(&mut self, store: &HistoryStore) {
        let mut search = ActiveSearch {
            query: String::new(),
            matches: Vec::new(),
            selected: 0,
            origin: store.len().checked_sub(1),
        };
        self.refresh(&mut search, store);
        self.state = SearchState::Active(search);
    }

    pub fn insert(&mut self, store: &HistoryStore, c: char) {
        self.edit(store, |query| query.push(c));
    }

    pub fn backspace(&mut self, store: &HistoryStore) {
        self.edit(store, |query| {
            query.pop();
        });
    }

    /// Select the next match, wrapping to the first.
    pub fn cycle_next(&mut self) {
        if let SearchState::Active(search) = &mut self.state {
            if search.matches.is_empty() {
                return;
            }
            search.selected = (search.selected + 1) % search.matches.len();
            search.origin = Some(search.matches[search.selected].position);
        }
    }

    pub fn select_previous(&mut self) {
        if let SearchState::Active(search) = &mut self.state {
            search.selected = search.selected.saturating_sub(1);
        }
    }

    pub fn select_next(&mut self) {
        if let SearchState::Active(search) = &mut self.state {
            let last = search.matches.len().saturating_sub(1);
            search.selected = (search.selected + 1).min(last);
        }
    }

    /// Accept the selected match and hide the overlay.
    pub fn commit(&mut self) -> SearchOutcome {
        match std::mem::take(&mut self.state) {
            SearchState::Active(search) => search
                .matches
                .get(search.selected)
                .map(|hit| SearchOutcome::Selected {
                    entry: hit.entry.clone(),
                    position: hit.position,
                })
                .unwrap_or(SearchOutcome::Dismissed),
            SearchState::Hidden => SearchOutcome::Dismissed,
        }
    }

    pub fn cancel(&mut self) -> SearchOutcome {
        self.state = SearchState::Hidden;
        SearchOutcome::Dismissed
    }

    fn edit(&mut self, store: &HistoryStore, f: impl FnOnce(&mut String)) {
        let mut state = std::mem::take(&mut self.state);
        if let SearchState::Active(search) = &mut state {
            f(&mut search.query);
            self.refresh(search, store);
        }
        self.state = state;
    }

    fn refresh(&self, search: &mut ActiveSearch, store: &HistoryStore) {
        let mut matches = store.search_indexed(&search.query);
        matches.truncate(self.cap());
        search.matches = matches;
        search.selected = 0;
    }
}
