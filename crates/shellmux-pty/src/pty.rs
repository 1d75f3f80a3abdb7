use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty};

use crate::error::SessionError;

/// How long `terminate` waits for the child to be reaped after `SIGKILL`.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between `try_wait` polls while waiting for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Shared PTY writer. Cloned out from under the session lock so that a
/// write blocked on a full kernel buffer never stalls the read loop.
pub type PtyWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Terminal dimensions in character cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
}

impl PtySize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    fn to_native(self) -> portable_pty::PtySize {
        portable_pty::PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// The process a session runs. Supplied by the caller and passed through
/// untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpawnCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl SpawnCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// The user's login shell (`$SHELL`), falling back to `/bin/sh`.
    pub fn default_shell() -> Self {
        Self::new(default_shell())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            cmd.cwd(dir);
        }
        cmd
    }
}

enum Termination {
    Graceful,
    Forceful,
}

/// Owns a portable-pty child process, master side, reader, and writer.
///
/// On unix portable-pty starts the child with `setsid`, so the child leads
/// its own process group and the whole subtree can be signaled at once.
pub struct PtyHandle {
    master: Option<Box<dyn MasterPty + Send>>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<PtyWriter>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
}

impl PtyHandle {
    /// Allocate a PTY of the given size and spawn `command` attached to it.
    pub fn spawn(command: &SpawnCommand, size: PtySize) -> Result<Self, SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(size.to_native())
            .map_err(|e| SessionError::ProcessSpawnFailed(format!("failed to open PTY: {e}")))?;

        let child = pair.slave.spawn_command(command.to_builder()).map_err(|e| {
            SessionError::ProcessSpawnFailed(format!("failed to spawn {}: {e}", command.program))
        })?;
        // Only the child keeps the slave open, so reads hit EOF once it exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::ProcessSpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::ProcessSpawnFailed(format!("failed to take writer: {e}")))?;

        let pid = child.process_id();
        log::debug!("spawned {} (pid {pid:?})", command.program);

        Ok(Self {
            master: Some(pair.master),
            reader: Some(reader),
            writer: Some(Arc::new(Mutex::new(writer))),
            child,
            pid,
        })
    }

    /// Hand the blocking reader to a dedicated I/O thread. Returns `None` if
    /// it was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// A clone of the writer, or `None` once the handle has been closed.
    pub fn writer(&self) -> Option<PtyWriter> {
        self.writer.clone()
    }

    /// Write bytes to the PTY master (user input -> child).
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let writer = self.writer.as_ref().ok_or(SessionError::SessionClosed)?;
        write_all(writer, data)
    }

    /// Resize the PTY. The kernel delivers `SIGWINCH` to the foreground group.
    pub fn resize(&self, size: PtySize) -> Result<(), SessionError> {
        let master = self.master.as_ref().ok_or(SessionError::SessionClosed)?;
        master
            .resize(size.to_native())
            .map_err(|e| SessionError::Resize(e.to_string()))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The child's exit code if it has exited. Returns `None` while running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Close the PTY and stop the child's process group.
    ///
    /// The master and writer are dropped first. Then the group gets
    /// `SIGTERM`; if the child is still alive after `grace` it gets `SIGKILL`.
    /// Returns the exit code if the child could be reaped.
    pub fn terminate(&mut self, grace: Duration) -> Option<u32> {
        self.writer = None;
        self.master = None;

        if let Some(code) = self.try_wait() {
            return Some(code);
        }

        self.signal_group(Termination::Graceful);
        if let Some(code) = self.wait_timeout(grace) {
            return Some(code);
        }

        log::debug!("pid {:?} still alive after {grace:?}, sending SIGKILL", self.pid);
        self.signal_group(Termination::Forceful);
        let code = self.wait_timeout(REAP_TIMEOUT);
        if code.is_none() {
            log::warn!("pid {:?} could not be reaped after SIGKILL", self.pid);
        }
        code
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.try_wait() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn signal_group(&mut self, termination: Termination) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let signal = match termination {
            Termination::Graceful => Signal::SIGTERM,
            Termination::Forceful => Signal::SIGKILL,
        };

        match self.pid.and_then(|pid| i32::try_from(pid).ok()) {
            Some(pid) if pid > 0 => {
                if let Err(e) = killpg(Pid::from_raw(pid), signal) {
                    log::debug!("killpg({pid}, {signal}) failed: {e}");
                }
            }
            _ => {
                if let Err(e) = self.child.kill() {
                    log::debug!("kill of child without pid failed: {e}");
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _termination: Termination) {
        if let Err(e) = self.child.kill() {
            log::debug!("kill of pid {:?} failed: {e}", self.pid);
        }
    }
}

/// Write all of `data` through a shared writer and flush.
pub(crate) fn write_all(writer: &PtyWriter, data: &[u8]) -> Result<(), SessionError> {
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.write_all(data)?;
    writer.flush()?;
    Ok(())
}

/// Returns the user's default shell, falling back to `/bin/sh`.
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}
