use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use shellmux_scrollback::ScrollbackBuffer;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::io_thread::start_io_thread;
use crate::pty::{write_all, PtyHandle, PtySize, SpawnCommand};

/// Unique identifier for a terminal session.
pub type SessionId = u64;

/// Grace period between `SIGTERM` and `SIGKILL` on close.
const TERM_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on waiting for the read loop to notice the closed PTY.
const JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Notifications from a session's read loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New output was ingested into the session's buffer.
    Output(SessionId),
    /// The read loop ended on its own (child exit or read error).
    Exited {
        id: SessionId,
        error: Option<String>,
    },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// State shared between a session and its read-loop thread.
pub(crate) struct SessionShared {
    pub(crate) running: bool,
    pub(crate) pty: Option<PtyHandle>,
    pub(crate) buffer: ScrollbackBuffer,
    pub(crate) size: PtySize,
    pub(crate) last_error: Option<String>,
    pub(crate) exit_code: Option<u32>,
}

/// A PTY-backed child process plus the scrollback its output feeds.
///
/// While `is_running()` is true the PTY handle is present and exactly one
/// read-loop thread is alive. A closed session is never restarted.
pub struct PtySession {
    id: SessionId,
    shared: Arc<Mutex<SessionShared>>,
    reader_thread: Option<JoinHandle<()>>,
}

impl PtySession {
    /// Spawn `command` on a fresh PTY and start its read loop.
    pub fn start(
        id: SessionId,
        command: &SpawnCommand,
        size: PtySize,
        scrollback_capacity: usize,
        events: Option<EventSender>,
    ) -> Result<Self, SessionError> {
        let mut pty = PtyHandle::spawn(command, size)?;
        let reader = pty.take_reader().ok_or_else(|| {
            SessionError::ProcessSpawnFailed("PTY reader unavailable".to_string())
        })?;

        let mut buffer = ScrollbackBuffer::new(scrollback_capacity);
        buffer.set_viewport_height(usize::from(size.rows));

        let shared = Arc::new(Mutex::new(SessionShared {
            running: true,
            pty: Some(pty),
            buffer,
            size,
            last_error: None,
            exit_code: None,
        }));

        let reader_thread = match start_io_thread(id, Arc::clone(&shared), reader, events) {
            Ok(handle) => handle,
            Err(e) => {
                let mut state = lock(&shared);
                state.running = false;
                if let Some(mut pty) = state.pty.take() {
                    pty.terminate(TERM_GRACE);
                }
                return Err(SessionError::ProcessSpawnFailed(format!(
                    "failed to start read loop: {e}"
                )));
            }
        };

        log::info!("session {id} started: {}", command.program);

        Ok(Self {
            id,
            shared,
            reader_thread: Some(reader_thread),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Forward `bytes` to the child unmodified.
    pub fn write(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let writer = {
            let state = lock(&self.shared);
            if !state.running {
                return Err(SessionError::SessionClosed);
            }
            state
                .pty
                .as_ref()
                .and_then(PtyHandle::writer)
                .ok_or(SessionError::SessionClosed)?
        };
        write_all(&writer, bytes)
    }

    /// Resize the PTY and record the new viewport height. No-op once closed.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        let mut state = lock(&self.shared);
        if !state.running {
            return Ok(());
        }
        let size = PtySize::new(rows, cols);
        if let Some(pty) = &state.pty {
            pty.resize(size)?;
        }
        state.size = size;
        state.buffer.set_viewport_height(usize::from(rows));
        Ok(())
    }

    /// Stop the child and the read loop. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), SessionError> {
        let pty = {
            let mut state = lock(&self.shared);
            state.running = false;
            state.pty.take()
        };

        if let Some(mut pty) = pty {
            let code = pty.terminate(TERM_GRACE);
            let mut state = lock(&self.shared);
            if state.exit_code.is_none() {
                state.exit_code = code;
            }
        }

        self.join_reader();
        Ok(())
    }

    fn join_reader(&mut self) {
        let Some(handle) = self.reader_thread.take() else {
            return;
        };

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("session {}: read loop did not stop, detaching", self.id);
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            log::error!("session {}: read loop panicked", self.id);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared).running
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared).last_error.clone()
    }

    /// The child's exit code, polling the child if it has not been seen yet.
    pub fn exit_code(&self) -> Option<u32> {
        let mut state = lock(&self.shared);
        if state.exit_code.is_none() {
            let code = state.pty.as_mut().and_then(PtyHandle::try_wait);
            state.exit_code = code;
        }
        state.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.shared).pty.as_ref().and_then(PtyHandle::pid)
    }

    pub fn size(&self) -> PtySize {
        lock(&self.shared).size
    }

    /// Run `f` against the scrollback buffer under the session lock.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&ScrollbackBuffer) -> R) -> R {
        f(&lock(&self.shared).buffer)
    }

    pub fn with_buffer_mut<R>(&self, f: impl FnOnce(&mut ScrollbackBuffer) -> R) -> R {
        f(&mut lock(&self.shared).buffer)
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn lock(shared: &Mutex<SessionShared>) -> MutexGuard<'_, SessionShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
