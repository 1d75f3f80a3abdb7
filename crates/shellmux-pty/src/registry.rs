use std::collections::HashMap;

use crate::error::SessionError;
use crate::pty::{PtySize, SpawnCommand};
use crate::session::{EventSender, PtySession, SessionId};

/// Where a tab's process runs. Remote tabs differ only in their command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabKind {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct Tab {
    pub id: SessionId,
    pub name: String,
    pub kind: TabKind,
    pub command: SpawnCommand,
}

/// Lifecycle of the session behind a tab, as shown in a tab bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabStatus {
    Running,
    Exited(Option<u32>),
    Failed(String),
}

/// Ordered tabs, each backed by at most one [`PtySession`].
///
/// Sessions are keyed by their stable id rather than tab position, so
/// closing a tab never shifts another tab's session.
pub struct SessionRegistry {
    tabs: Vec<Tab>,
    sessions: HashMap<SessionId, PtySession>,
    failures: HashMap<SessionId, String>,
    active: usize,
    next_id: SessionId,
    viewport: Option<PtySize>,
    default_size: PtySize,
    default_command: SpawnCommand,
    scrollback_capacity: usize,
    events: Option<EventSender>,
}

impl SessionRegistry {
    pub fn new(default_command: SpawnCommand, scrollback_capacity: usize) -> Self {
        Self {
            tabs: Vec::new(),
            sessions: HashMap::new(),
            failures: HashMap::new(),
            active: 0,
            next_id: 0,
            viewport: None,
            default_size: PtySize::default(),
            default_command,
            scrollback_capacity,
            events: None,
        }
    }

    /// Route every session's [`SessionEvent`](crate::SessionEvent)s to `events`.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Size used for new sessions until the first `broadcast_resize`.
    pub fn with_default_size(mut self, size: PtySize) -> Self {
        self.default_size = size;
        self
    }

    /// Open a tab running the default command and make it active.
    pub fn add(&mut self, name: &str, kind: TabKind) -> Result<SessionId, SessionError> {
        let command = self.default_command.clone();
        self.add_with_command(name, kind, command)
    }

    /// Open a tab running `command` and make it active.
    ///
    /// If the spawn fails the tab is still added, carrying the error.
    pub fn add_with_command(
        &mut self,
        name: &str,
        kind: TabKind,
        command: SpawnCommand,
    ) -> Result<SessionId, SessionError> {
        let id = self.allocate_id();
        self.tabs.push(Tab {
            id,
            name: name.to_string(),
            kind,
            command: command.clone(),
        });
        self.active = self.tabs.len() - 1;
        self.spawn(id, &command)
    }

    /// Respawn the active tab's command under a fresh id if its session
    /// failed or exited. A running session is left alone.
    pub fn retry_active(&mut self) -> Result<SessionId, SessionError> {
        let Some(tab) = self.tabs.get(self.active) else {
            return Err(SessionError::SessionClosed);
        };
        let old_id = tab.id;
        let command = tab.command.clone();

        if self.sessions.get(&old_id).is_some_and(PtySession::is_running) {
            return Ok(old_id);
        }

        if let Some(mut old) = self.sessions.remove(&old_id) {
            if let Err(e) = old.close() {
                log::warn!("session {old_id}: close failed: {e}");
            }
        }
        self.failures.remove(&old_id);

        let id = self.allocate_id();
        self.tabs[self.active].id = id;
        log::info!("retrying tab {} as session {id}", self.active);
        self.spawn(id, &command)
    }

    /// Close the active tab's session.
    ///
    /// Returns `true` when it was the last tab: the tab stays in place and
    /// the caller should quit. Otherwise the tab is removed.
    pub fn close_active(&mut self) -> bool {
        let Some(tab) = self.tabs.get(self.active) else {
            return true;
        };
        let id = tab.id;

        if self.tabs.len() == 1 {
            if let Some(session) = self.sessions.get_mut(&id) {
                if let Err(e) = session.close() {
                    log::warn!("session {id}: close failed: {e}");
                }
            }
            return true;
        }

        if let Some(mut session) = self.sessions.remove(&id) {
            if let Err(e) = session.close() {
                log::warn!("session {id}: close failed: {e}");
            }
        }
        self.failures.remove(&id);
        self.tabs.remove(self.active);
        if self.active >= self.tabs.len() {
            self.active = self.tabs.len() - 1;
        }
        false
    }

    pub fn next(&mut self) {
        if self.tabs.len() > 1 {
            self.active = (self.active + 1) % self.tabs.len();
        }
    }

    pub fn previous(&mut self) {
        if self.tabs.len() > 1 {
            self.active = (self.active + self.tabs.len() - 1) % self.tabs.len();
        }
    }

    pub fn active_session(&self) -> Option<&PtySession> {
        self.active_tab().and_then(|tab| self.sessions.get(&tab.id))
    }

    pub fn active_session_mut(&mut self) -> Option<&mut PtySession> {
        let id = self.active_tab()?.id;
        self.sessions.get_mut(&id)
    }

    /// Record the viewport size and resize every live session to it.
    pub fn broadcast_resize(&mut self, rows: u16, cols: u16) {
        self.viewport = Some(PtySize::new(rows, cols));
        for (id, session) in &self.sessions {
            if let Err(e) = session.resize(rows, cols) {
                log::warn!("session {id}: resize to {rows}x{cols} failed: {e}");
            }
        }
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tabs.get(self.active)
    }

    pub fn session(&self, id: SessionId) -> Option<&PtySession> {
        self.sessions.get(&id)
    }

    /// The spawn error recorded for `id`, if its session never started.
    pub fn spawn_error(&self, id: SessionId) -> Option<&str> {
        self.failures.get(&id).map(String::as_str)
    }

    pub fn status(&self, tab: &Tab) -> TabStatus {
        if let Some(error) = self.failures.get(&tab.id) {
            return TabStatus::Failed(error.clone());
        }
        match self.sessions.get(&tab.id) {
            Some(session) if session.is_running() => TabStatus::Running,
            Some(session) => TabStatus::Exited(session.exit_code()),
            None => TabStatus::Exited(None),
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// The size new sessions start at.
    pub fn viewport(&self) -> PtySize {
        self.viewport.unwrap_or(self.default_size)
    }

    /// Close every session. Tabs are kept for a final render.
    pub fn close_all(&mut self) {
        for (id, session) in &mut self.sessions {
            if let Err(e) = session.close() {
                log::warn!("session {id}: close failed: {e}");
            }
        }
    }

    /// Poll exit codes of sessions whose read loop has ended and return
    /// their ids.
    pub fn poll_exits(&self) -> Vec<SessionId> {
        let mut finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| !session.is_running())
            .map(|(id, session)| {
                let code = session.exit_code();
                log::debug!("session {id} finished with {code:?}");
                *id
            })
            .collect();
        finished.sort_unstable();
        finished
    }

    fn allocate_id(&mut self) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn spawn(&mut self, id: SessionId, command: &SpawnCommand) -> Result<SessionId, SessionError> {
        match PtySession::start(
            id,
            command,
            self.viewport(),
            self.scrollback_capacity,
            self.events.clone(),
        ) {
            Ok(session) => {
                self.sessions.insert(id, session);
                Ok(id)
            }
            Err(e) => {
                log::error!("session {id}: {e}");
                self.failures.insert(id, e.to_string());
                Err(e)
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellmux_scrollback::DEFAULT_CAPACITY;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(SpawnCommand::new("/bin/sh"), DEFAULT_CAPACITY)
    }

    fn broken() -> SpawnCommand {
        SpawnCommand::new("/nonexistent/shellmux-shell")
    }

    #[test]
    fn test_add_assigns_increasing_ids_and_activates() {
        let mut reg = registry();
        assert!(reg.is_empty());

        let first = reg.add("one", TabKind::Local).unwrap();
        let second = reg.add("two", TabKind::Local).unwrap();
        assert_eq!((first, second), (0, 1));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.active_index(), 1);
        assert_eq!(reg.active_session().map(PtySession::id), Some(1));
        assert_eq!(reg.status(&reg.tabs()[0]), TabStatus::Running);
    }

    #[test]
    fn test_failed_spawn_keeps_tab() {
        let mut reg = registry();
        reg.add("ok", TabKind::Local).unwrap();
        let result = reg.add_with_command("bad", TabKind::Remote, broken());
        assert!(matches!(result, Err(SessionError::ProcessSpawnFailed(_))));

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.active_index(), 1);
        assert!(reg.active_session().is_none());
        let tab = reg.active_tab().unwrap();
        assert_eq!(tab.kind, TabKind::Remote);
        assert!(reg.spawn_error(tab.id).is_some());
        assert!(matches!(reg.status(tab), TabStatus::Failed(_)));
    }

    #[test]
    fn test_retry_active_uses_fresh_id() {
        let mut reg = registry();
        let _ = reg.add_with_command("bad", TabKind::Local, broken());
        assert!(reg.retry_active().is_err());
        let failed_id = reg.active_tab().unwrap().id;
        assert_eq!(failed_id, 1);

        reg.tabs[0].command = SpawnCommand::new("/bin/sh");
        let id = reg.retry_active().unwrap();
        assert_eq!(id, 2);
        assert!(reg.spawn_error(failed_id).is_none());
        assert!(reg.active_session().is_some_and(PtySession::is_running));

        // A running session is left alone.
        assert_eq!(reg.retry_active().unwrap(), id);
    }

    #[test]
    fn test_next_previous_cycle() {
        let mut reg = registry();
        reg.next();
        reg.previous();
        assert_eq!(reg.active_index(), 0);

        for name in ["a", "b", "c"] {
            reg.add(name, TabKind::Local).unwrap();
        }
        assert_eq!(reg.active_index(), 2);
        reg.next();
        assert_eq!(reg.active_index(), 0);
        reg.previous();
        assert_eq!(reg.active_index(), 2);
        reg.previous();
        assert_eq!(reg.active_index(), 1);
    }

    #[test]
    fn test_single_tab_cycle_is_noop() {
        let mut reg = registry();
        reg.add("only", TabKind::Local).unwrap();
        reg.next();
        assert_eq!(reg.active_index(), 0);
        reg.previous();
        assert_eq!(reg.active_index(), 0);
    }

    #[test]
    fn test_close_active_removes_tab_and_clamps() {
        let mut reg = registry();
        reg.add("a", TabKind::Local).unwrap();
        reg.add("b", TabKind::Local).unwrap();
        assert_eq!(reg.active_index(), 1);

        assert!(!reg.close_active());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.active_index(), 0);
        assert_eq!(reg.active_tab().unwrap().name, "a");
        assert!(reg.session(1).is_none());
    }

    #[test]
    fn test_close_last_tab_requests_quit() {
        let mut reg = registry();
        reg.add("only", TabKind::Local).unwrap();
        assert!(reg.close_active());
        assert_eq!(reg.len(), 1);
        assert!(!reg.active_session().unwrap().is_running());
    }

    #[test]
    fn test_broadcast_resize_applies_to_new_sessions() {
        let mut reg = registry();
        reg.add("a", TabKind::Local).unwrap();
        reg.broadcast_resize(50, 132);
        assert_eq!(reg.active_session().unwrap().size(), PtySize::new(50, 132));

        reg.add("b", TabKind::Local).unwrap();
        assert_eq!(reg.active_session().unwrap().size(), PtySize::new(50, 132));
        assert_eq!(reg.viewport(), PtySize::new(50, 132));
    }

    #[test]
    fn test_poll_exits_reports_finished_sessions() {
        let mut reg = registry();
        reg.add("live", TabKind::Local).unwrap();
        reg.add_with_command(
            "done",
            TabKind::Local,
            SpawnCommand::new("/bin/sh").arg("-c").arg("exit 0"),
        )
        .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        while reg.poll_exits().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(reg.poll_exits(), vec![1]);
    }
}
