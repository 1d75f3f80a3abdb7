//! The application controller: routes actions to the registry, history and
//! focus layers, and builds views for the presentation layer.

use shellmux_history::{HistorySearch, HistoryStore, SearchOutcome};
use shellmux_pty::{SessionError, SessionEvent, SessionId, SessionRegistry, SpawnCommand, TabKind};
use shellmux_scrollback::{ClipboardSink, SelectionMove};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::AppError;
use crate::focus::{Focus, FocusStack};
use crate::input::{Action, Key};
use crate::view::{is_remote, LineView, SearchView, SessionView, TabView};

/// Ctrl-U: clears the shell's line editor before a recalled entry is typed.
const KILL_LINE: u8 = 0x15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

pub struct App {
    registry: SessionRegistry,
    history: HistoryStore,
    search: HistorySearch,
    focus: FocusStack,
    clipboard: Box<dyn ClipboardSink + Send>,
    /// Shadow of what has been typed on the current shell line.
    input_line: String,
    /// False once the shell's own line editing (cursor moves, completion)
    /// may have made `input_line` diverge from the real line.
    input_tracked: bool,
    tabs_opened: usize,
}

impl App {
    /// Load history and open the first tab.
    ///
    /// History that cannot be loaded and a first tab that fails to spawn are
    /// both logged; neither stops the app.
    pub fn new(
        config: Config,
        clipboard: Box<dyn ClipboardSink + Send>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), AppError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let history = HistoryStore::new(config.history_size, config.history_path());
        if let Err(e) = history.load() {
            log::warn!("starting with empty history: {e}");
        }

        let registry = SessionRegistry::new(config.spawn_command(), config.scrollback_lines)
            .with_events(events_tx)
            .with_default_size(config.initial_size());

        let mut app = Self {
            registry,
            history,
            search: HistorySearch::new(),
            focus: FocusStack::new(),
            clipboard,
            input_line: String::new(),
            input_tracked: true,
            tabs_opened: 0,
        };
        app.search
            .set_viewport_height(usize::from(config.initial_size().rows));

        if let Err(e) = app.new_tab(None) {
            log::warn!("first tab failed to start: {e}");
        }
        Ok((app, events_rx))
    }

    pub fn handle(&mut self, action: Action) -> Result<Control, AppError> {
        match action {
            Action::Key(key) => return self.handle_key(key),
            Action::Paste => self.paste()?,
            Action::CopyAll => self.copy_all(),
            Action::EnterSelection => self.enter_selection(),
            Action::OpenHistorySearch => self.open_search(),
            Action::NewTab => {
                self.new_tab(None)?;
            }
            Action::CloseTab => return Ok(self.close_tab()),
            Action::NextTab => {
                self.leave_tab();
                self.registry.next();
            }
            Action::PrevTab => {
                self.leave_tab();
                self.registry.previous();
            }
            Action::RetryTab => {
                self.leave_tab();
                self.registry.retry_active()?;
            }
            Action::RecallPrevious => self.recall_previous()?,
            Action::RecallNext => self.recall_next()?,
            Action::ScrollUp => self.with_active_buffer(|b| b.scroll_up(b.viewport_height().max(1))),
            Action::ScrollDown => {
                self.with_active_buffer(|b| b.scroll_down(b.viewport_height().max(1)))
            }
            Action::Resize { rows, cols } => {
                self.registry.broadcast_resize(rows, cols);
                self.search.set_viewport_height(usize::from(rows));
            }
            Action::Tick => {
                self.registry.poll_exits();
            }
        }
        Ok(Control::Continue)
    }

    /// Open a local tab running the configured shell. Unnamed tabs are
    /// numbered in opening order.
    pub fn new_tab(&mut self, name: Option<&str>) -> Result<SessionId, AppError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("shell {}", self.tabs_opened + 1),
        };
        self.leave_tab();
        self.tabs_opened += 1;
        let id = self.registry.add(&name, TabKind::Local)?;
        log::info!("opened tab {name} (session {id})");
        Ok(id)
    }

    /// Open a tab running `command`, e.g. an ssh invocation for a remote tab.
    pub fn open_tab(
        &mut self,
        name: &str,
        kind: TabKind,
        command: SpawnCommand,
    ) -> Result<SessionId, AppError> {
        self.leave_tab();
        self.tabs_opened += 1;
        let id = self.registry.add_with_command(name, kind, command)?;
        log::info!("opened tab {name} (session {id})");
        Ok(id)
    }

    /// Save history and close every session.
    pub fn shutdown(&mut self) -> Result<(), AppError> {
        self.registry.close_all();
        self.history.save()?;
        Ok(())
    }

    pub fn focus(&self) -> Focus {
        self.focus.current()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn input_line(&self) -> &str {
        &self.input_line
    }

    pub fn tabs(&self) -> Vec<TabView> {
        let active = self.registry.active_index();
        self.registry
            .tabs()
            .iter()
            .enumerate()
            .map(|(index, tab)| TabView {
                id: tab.id,
                name: tab.name.clone(),
                remote: is_remote(tab.kind),
                active: index == active,
                state: self.registry.status(tab).into(),
            })
            .collect()
    }

    /// The active tab's body for a viewport `height` rows tall.
    pub fn active_view(&self, height: usize) -> SessionView {
        let Some(tab) = self.registry.active_tab() else {
            return SessionView::Starting;
        };
        if let Some(error) = self.registry.spawn_error(tab.id) {
            return SessionView::Error {
                message: error.to_string(),
            };
        }
        let Some(session) = self.registry.session(tab.id) else {
            return SessionView::Starting;
        };
        if let Some(message) = session.last_error() {
            return SessionView::Error { message };
        }
        session.with_buffer(|buffer| SessionView::Lines {
            lines: buffer
                .visible_window(height)
                .into_iter()
                .map(LineView::from)
                .collect(),
            scroll_offset: buffer.scroll_offset(),
            selecting: buffer.is_selecting(),
        })
    }

    pub fn search_view(&self) -> Option<SearchView> {
        self.search.active().map(SearchView::from)
    }

    fn handle_key(&mut self, key: Key) -> Result<Control, AppError> {
        match self.focus.current() {
            Focus::Terminal => self.terminal_key(key)?,
            Focus::Selection => self.selection_key(key),
            Focus::HistorySearch => self.search_key(key)?,
        }
        Ok(Control::Continue)
    }

    fn terminal_key(&mut self, key: Key) -> Result<(), AppError> {
        match key {
            Key::Up => return self.recall_previous(),
            Key::Down => return self.recall_next(),
            Key::Char(c) => self.input_line.push(c),
            Key::Backspace => {
                self.input_line.pop();
            }
            Key::Enter => {
                if self.input_tracked {
                    self.history.add(&self.input_line);
                } else {
                    log::debug!("line was edited in place, not recorded in history");
                }
                self.clear_input_line();
            }
            Key::Ctrl(c) if matches!(c.to_ascii_lowercase(), 'c' | 'u') => self.clear_input_line(),
            Key::Left | Key::Right | Key::Home | Key::End | Key::Tab | Key::Esc | Key::Ctrl(_) => {
                self.input_tracked = false;
            }
            Key::PageUp | Key::PageDown => {}
        }
        self.write_active(&key.to_bytes())
    }

    fn recall_previous(&mut self) -> Result<(), AppError> {
        match self.history.previous() {
            Some(entry) => self.replace_line(&entry),
            None => Ok(()),
        }
    }

    fn recall_next(&mut self) -> Result<(), AppError> {
        let entry = self.history.next().unwrap_or_default();
        self.replace_line(&entry)
    }

    fn clear_input_line(&mut self) {
        self.input_line.clear();
        self.input_tracked = true;
    }

    fn selection_key(&mut self, key: Key) {
        if self.registry.active_session().is_none() {
            self.focus.remove(Focus::Selection);
            return;
        }

        let movement = match key {
            Key::Up => Some(SelectionMove::By(-1)),
            Key::Down => Some(SelectionMove::By(1)),
            Key::PageUp => Some(SelectionMove::PageUp),
            Key::PageDown => Some(SelectionMove::PageDown),
            Key::Home => Some(SelectionMove::Start),
            Key::End => Some(SelectionMove::End),
            _ => None,
        };

        if let Some(movement) = movement {
            self.with_active_buffer(|b| b.move_selection_cursor(movement));
            return;
        }

        match key {
            Key::Char('a') => self.with_active_buffer(|b| b.select_all()),
            Key::Enter | Key::Char('y') | Key::Char('c') => {
                self.copy_selection();
                self.focus.remove(Focus::Selection);
            }
            Key::Esc => {
                self.with_active_buffer(|b| b.exit_selection_mode());
                self.focus.remove(Focus::Selection);
            }
            _ => {}
        }
    }

    fn search_key(&mut self, key: Key) -> Result<(), AppError> {
        match key {
            Key::Char(c) => self.search.insert(&self.history, c),
            Key::Backspace => self.search.backspace(&self.history),
            Key::Up => self.search.select_previous(),
            Key::Down => self.search.select_next(),
            Key::Ctrl(c) => match c.to_ascii_lowercase() {
                'r' => self.search.cycle_next(),
                'c' | 'g' => self.close_search(false)?,
                _ => {}
            },
            Key::Enter => self.close_search(true)?,
            Key::Esc => self.close_search(false)?,
            _ => {}
        }
        Ok(())
    }

    fn open_search(&mut self) {
        self.search.open(&self.history);
        self.focus.push(Focus::HistorySearch);
    }

    fn close_search(&mut self, accept: bool) -> Result<(), AppError> {
        let outcome = if accept {
            self.search.commit()
        } else {
            self.search.cancel()
        };
        self.focus.remove(Focus::HistorySearch);

        if let SearchOutcome::Selected { entry, position } = outcome {
            self.replace_line(&entry)?;
            self.history.set_position(position);
        }
        Ok(())
    }

    fn enter_selection(&mut self) {
        if self.registry.active_session().is_none() {
            return;
        }
        self.with_active_buffer(|b| b.enter_selection_mode());
        self.focus.push(Focus::Selection);
    }

    fn copy_selection(&mut self) {
        let clipboard = &mut *self.clipboard;
        let Some(session) = self.registry.active_session() else {
            return;
        };
        if let Err(e) = session.with_buffer_mut(|b| b.copy_selection(clipboard)) {
            log::warn!("copy failed: {e}");
        }
    }

    fn copy_all(&mut self) {
        let clipboard = &mut *self.clipboard;
        let Some(session) = self.registry.active_session() else {
            return;
        };
        if let Err(e) = session.with_buffer(|b| b.copy_all(clipboard)) {
            log::warn!("copy failed: {e}");
        }
    }

    fn paste(&mut self) -> Result<(), AppError> {
        let text = match self.clipboard.get_text() {
            Ok(text) => text,
            Err(e) => {
                log::warn!("paste failed: {e}");
                return Ok(());
            }
        };

        match self.focus.current() {
            Focus::Terminal => {
                self.input_line.push_str(&text);
                self.write_active(text.as_bytes())
            }
            Focus::HistorySearch => {
                for c in text.chars().filter(|c| !c.is_control()) {
                    self.search.insert(&self.history, c);
                }
                Ok(())
            }
            Focus::Selection => Ok(()),
        }
    }

    fn close_tab(&mut self) -> Control {
        self.leave_tab();
        if !self.registry.close_active() {
            return Control::Continue;
        }
        if let Err(e) = self.history.save() {
            log::warn!("failed to save history: {e}");
        }
        Control::Quit
    }

    /// Drop per-tab modal state before the active tab changes.
    fn leave_tab(&mut self) {
        if self.focus.contains(Focus::Selection) {
            self.with_active_buffer(|b| b.exit_selection_mode());
            self.focus.remove(Focus::Selection);
        }
        self.clear_input_line();
    }

    /// Clear the shell's current line and type `entry` in its place.
    fn replace_line(&mut self, entry: &str) -> Result<(), AppError> {
        let mut bytes = Vec::with_capacity(entry.len() + 1);
        bytes.push(KILL_LINE);
        bytes.extend_from_slice(entry.as_bytes());
        self.input_line = entry.to_string();
        self.input_tracked = true;
        self.write_active(&bytes)
    }

    fn write_active(&self, bytes: &[u8]) -> Result<(), AppError> {
        let Some(session) = self.registry.active_session() else {
            log::debug!("no active session, dropped {} bytes", bytes.len());
            return Ok(());
        };
        match session.write(bytes) {
            Ok(()) => Ok(()),
            Err(SessionError::SessionClosed) => {
                log::debug!("session {} is closed, dropped input", session.id());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn with_active_buffer(&self, f: impl FnOnce(&mut shellmux_scrollback::ScrollbackBuffer)) {
        if let Some(session) = self.registry.active_session() {
            session.with_buffer_mut(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use shellmux_scrollback::{ClipboardError, MemoryClipboard};
    use tempfile::TempDir;

    use crate::view::TabState;

    #[derive(Clone, Default)]
    struct SharedClipboard(Arc<Mutex<MemoryClipboard>>);

    impl SharedClipboard {
        fn contents(&self) -> Option<String> {
            self.0.lock().unwrap().contents().map(str::to_string)
        }
    }

    impl ClipboardSink for SharedClipboard {
        fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
            self.0.lock().unwrap().set_text(text)
        }

        fn get_text(&mut self) -> Result<String, ClipboardError> {
            self.0.lock().unwrap().get_text()
        }
    }

    fn config(dir: &Path) -> Config {
        Config {
            shell: Some("/bin/sh".to_string()),
            history_file: Some(dir.join("history")),
            ..Config::default()
        }
    }

    fn app() -> (App, SharedClipboard, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clipboard = SharedClipboard::default();
        let (app, _events) = App::new(config(dir.path()), Box::new(clipboard.clone())).unwrap();
        (app, clipboard, dir)
    }

    fn type_line(app: &mut App, line: &str) {
        for c in line.chars() {
            app.handle(Action::Key(Key::Char(c))).unwrap();
        }
        app.handle(Action::Key(Key::Enter)).unwrap();
    }

    fn wait_for_line(app: &App, wanted: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            let found = app
                .registry()
                .active_session()
                .is_some_and(|s| s.with_buffer(|b| b.lines().any(|l| l == wanted)));
            if found {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_new_opens_first_tab() {
        let (app, _, _dir) = app();
        let tabs = app.tabs();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].name, "shell 1");
        assert!(tabs[0].active);
        assert_eq!(tabs[0].state, TabState::Running);
        assert_eq!(app.focus(), Focus::Terminal);
    }

    #[test]
    fn test_enter_records_history() {
        let (mut app, _, _dir) = app();
        type_line(&mut app, "echo one");
        assert_eq!(app.history().entries(), vec!["echo one"]);
        assert_eq!(app.input_line(), "");

        for c in "typo".chars() {
            app.handle(Action::Key(Key::Char(c))).unwrap();
        }
        app.handle(Action::Key(Key::Ctrl('c'))).unwrap();
        app.handle(Action::Key(Key::Enter)).unwrap();
        assert_eq!(app.history().entries(), vec!["echo one"]);
    }

    #[test]
    fn test_recall_previous_replaces_line() {
        let (mut app, _, _dir) = app();
        type_line(&mut app, "echo first");
        type_line(&mut app, "echo second");

        app.handle(Action::RecallPrevious).unwrap();
        assert_eq!(app.input_line(), "echo second");
        app.handle(Action::RecallPrevious).unwrap();
        assert_eq!(app.input_line(), "echo first");
        app.handle(Action::RecallNext).unwrap();
        assert_eq!(app.input_line(), "echo second");
        app.handle(Action::RecallNext).unwrap();
        assert_eq!(app.input_line(), "");
    }

    #[test]
    fn test_arrows_recall_history_in_terminal_focus() {
        let (mut app, _, _dir) = app();
        type_line(&mut app, "echo a");

        app.handle(Action::Key(Key::Up)).unwrap();
        assert_eq!(app.input_line(), "echo a");
        assert_eq!(app.history().position(), 0);
        app.handle(Action::Key(Key::Enter)).unwrap();
        assert_eq!(app.history().entries(), vec!["echo a"]);

        app.handle(Action::Key(Key::Up)).unwrap();
        app.handle(Action::Key(Key::Down)).unwrap();
        assert_eq!(app.input_line(), "");
    }

    #[test]
    fn test_in_place_edit_is_not_recorded() {
        let (mut app, _, _dir) = app();
        for key in [Key::Char('l'), Key::Char('s'), Key::Left, Key::Left, Key::Char('x')] {
            app.handle(Action::Key(key)).unwrap();
        }
        app.handle(Action::Key(Key::Enter)).unwrap();
        assert!(app.history().is_empty());

        // Tracking resumes on the next line.
        type_line(&mut app, "pwd");
        assert_eq!(app.history().entries(), vec!["pwd"]);

        for c in "ech".chars() {
            app.handle(Action::Key(Key::Char(c))).unwrap();
        }
        app.handle(Action::Key(Key::Tab)).unwrap();
        app.handle(Action::Key(Key::Enter)).unwrap();
        assert_eq!(app.history().entries(), vec!["pwd"]);

        // A recalled line is known again, even after an untracked edit.
        app.handle(Action::Key(Key::Ctrl('a'))).unwrap();
        app.handle(Action::Key(Key::Up)).unwrap();
        app.handle(Action::Key(Key::Enter)).unwrap();
        assert_eq!(app.history().entries(), vec!["pwd"]);
        assert_eq!(app.history().position(), 1);
    }

    #[test]
    fn test_corrupt_history_file_does_not_stop_startup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("history"), b"ls\n\xff\xfe bad\npwd\n").unwrap();
        let (app, _events) = App::new(config(dir.path()), Box::new(SharedClipboard::default())).unwrap();
        assert_eq!(app.history().entries(), vec!["ls", "pwd"]);
        assert_eq!(app.tabs().len(), 1);
    }

    #[test]
    fn test_unreadable_history_starts_empty_and_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("marker"), "keep").unwrap();

        let (mut app, _events) =
            App::new(config(dir.path()), Box::new(SharedClipboard::default())).unwrap();
        assert!(app.history().is_empty());
        type_line(&mut app, "echo new");
        app.shutdown().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo new\n");
        assert!(dir.path().join("history.bak").join("marker").exists());
    }

    #[test]
    fn test_history_search_commit() {
        let (mut app, _, _dir) = app();
        type_line(&mut app, "make build");
        type_line(&mut app, "ls");
        type_line(&mut app, "make test");

        app.handle(Action::OpenHistorySearch).unwrap();
        assert_eq!(app.focus(), Focus::HistorySearch);
        for c in "make".chars() {
            app.handle(Action::Key(Key::Char(c))).unwrap();
        }
        let view = app.search_view().unwrap();
        assert_eq!(view.matches, vec!["make test", "make build"]);

        app.handle(Action::Key(Key::Ctrl('r'))).unwrap();
        app.handle(Action::Key(Key::Enter)).unwrap();
        assert_eq!(app.focus(), Focus::Terminal);
        assert!(app.search_view().is_none());
        assert_eq!(app.input_line(), "make build");
        assert_eq!(app.history().position(), 0);
    }

    #[test]
    fn test_history_search_cancel() {
        let (mut app, _, _dir) = app();
        type_line(&mut app, "ls");
        app.handle(Action::OpenHistorySearch).unwrap();
        app.handle(Action::Key(Key::Ctrl('g'))).unwrap();
        assert_eq!(app.focus(), Focus::Terminal);
        assert_eq!(app.input_line(), "");
    }

    #[test]
    fn test_selection_copy() {
        let (mut app, clipboard, _dir) = app();
        type_line(&mut app, "echo copy$((1+2))");
        assert!(wait_for_line(&app, "copy3"));

        app.handle(Action::EnterSelection).unwrap();
        assert_eq!(app.focus(), Focus::Selection);
        assert!(matches!(
            app.active_view(10),
            SessionView::Lines { selecting: true, .. }
        ));

        app.handle(Action::Key(Key::Char('a'))).unwrap();
        app.handle(Action::Key(Key::Char('y'))).unwrap();
        assert_eq!(app.focus(), Focus::Terminal);
        let copied = clipboard.contents().unwrap();
        assert!(copied.lines().any(|l| l == "copy3"), "copied: {copied:?}");
    }

    #[test]
    fn test_selection_escape_cancels() {
        let (mut app, clipboard, _dir) = app();
        app.handle(Action::EnterSelection).unwrap();
        app.handle(Action::Key(Key::Esc)).unwrap();
        assert_eq!(app.focus(), Focus::Terminal);
        assert_eq!(clipboard.contents(), None);
    }

    #[test]
    fn test_tabs_cycle_and_close() {
        let (mut app, _, _dir) = app();
        app.handle(Action::NewTab).unwrap();
        app.handle(Action::NewTab).unwrap();
        let names: Vec<_> = app.tabs().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["shell 1", "shell 2", "shell 3"]);
        assert_eq!(app.registry().active_index(), 2);

        app.handle(Action::NextTab).unwrap();
        assert_eq!(app.registry().active_index(), 0);
        app.handle(Action::PrevTab).unwrap();
        assert_eq!(app.registry().active_index(), 2);

        assert_eq!(app.handle(Action::CloseTab).unwrap(), Control::Continue);
        assert_eq!(app.tabs().len(), 2);
    }

    #[test]
    fn test_closing_last_tab_quits_and_saves_history() {
        let (mut app, _, dir) = app();
        type_line(&mut app, "echo saved");
        assert_eq!(app.handle(Action::CloseTab).unwrap(), Control::Quit);
        assert_eq!(app.tabs().len(), 1);

        let saved = std::fs::read_to_string(dir.path().join("history")).unwrap();
        assert_eq!(saved, "echo saved\n");
    }

    #[test]
    fn test_failed_spawn_shows_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            shell: Some("/nonexistent/shellmux-shell".to_string()),
            ..config(dir.path())
        };
        let (mut app, _events) = App::new(config, Box::new(SharedClipboard::default())).unwrap();

        assert!(matches!(app.active_view(10), SessionView::Error { .. }));
        assert!(matches!(app.tabs()[0].state, TabState::Failed { .. }));
        // Typing into a failed tab is dropped, not an error.
        app.handle(Action::Key(Key::Char('x'))).unwrap();
        assert!(app.handle(Action::RetryTab).is_err());
    }

    #[test]
    fn test_resize_reaches_sessions() {
        let (mut app, _, _dir) = app();
        app.handle(Action::Resize { rows: 40, cols: 100 }).unwrap();
        let session = app.registry().active_session().unwrap();
        assert_eq!(session.size(), shellmux_pty::PtySize::new(40, 100));
    }

    #[test]
    fn test_shutdown_saves_and_closes() {
        let (mut app, _, dir) = app();
        type_line(&mut app, "pwd");
        app.shutdown().unwrap();
        assert!(!app.registry().active_session().unwrap().is_running());
        assert!(dir.path().join("history").exists());
    }
}
