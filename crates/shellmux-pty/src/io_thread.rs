//! Per-session read loop.
//!
//! PTY reads block, so every session gets its own OS thread. The reader is
//! owned by the thread directly, not behind the session mutex; the lock is
//! only taken for the short ingest step after each read.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::session::{EventSender, SessionEvent, SessionId, SessionShared};

const READ_CHUNK: usize = 4096;

/// Start the read loop for `session_id` on a dedicated thread.
pub(crate) fn start_io_thread(
    session_id: SessionId,
    shared: Arc<Mutex<SessionShared>>,
    reader: Box<dyn Read + Send>,
    events: Option<EventSender>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pty-io-{session_id}"))
        .spawn(move || io_loop(session_id, shared, reader, events))
}

fn io_loop(
    session_id: SessionId,
    shared: Arc<Mutex<SessionShared>>,
    mut reader: Box<dyn Read + Send>,
    events: Option<EventSender>,
) {
    let mut buf = [0u8; READ_CHUNK];

    let error = loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_closed_pty(&e) => break None,
            Err(e) => break Some(e.to_string()),
        };

        {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            // Closed while this read was in flight: drop the bytes.
            if !state.running {
                return;
            }
            state.buffer.ingest(&buf[..n]);
        }

        notify(&events, SessionEvent::Output(session_id));
    };

    {
        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.running {
            return;
        }
        state.running = false;
        if let Some(message) = &error {
            log::error!("session {session_id}: PTY read failed: {message}");
            state.last_error = Some(message.clone());
        } else {
            log::debug!("session {session_id}: PTY closed");
        }
    }

    notify(
        &events,
        SessionEvent::Exited {
            id: session_id,
            error,
        },
    );
}

fn notify(events: &Option<EventSender>, event: SessionEvent) {
    if let Some(tx) = events {
        // The receiver going away only means nobody is rendering anymore.
        let _ = tx.send(event);
    }
}

/// Linux reports EIO on the master once the slave side has no open handles.
/// That is how a normal shell exit looks from the read loop.
#[cfg(unix)]
fn is_closed_pty(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_closed_pty(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use shellmux_scrollback::ScrollbackBuffer;
    use tokio::sync::mpsc;

    use crate::pty::PtySize;

    /// Hands out scripted reads, then reports end of file.
    struct ScriptedReader(VecDeque<io::Result<Vec<u8>>>);

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn shared() -> Arc<Mutex<SessionShared>> {
        Arc::new(Mutex::new(SessionShared {
            running: true,
            pty: None,
            buffer: ScrollbackBuffer::new(100),
            size: PtySize::new(24, 80),
            last_error: None,
            exit_code: None,
        }))
    }

    fn run(script: Vec<io::Result<Vec<u8>>>) -> (Arc<Mutex<SessionShared>>, Vec<SessionEvent>) {
        let shared = shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reader = Box::new(ScriptedReader(script.into()));
        start_io_thread(7, shared.clone(), reader, Some(tx))
            .unwrap()
            .join()
            .unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (shared, events)
    }

    #[test]
    fn test_read_error_is_kept_as_last_error() {
        let (shared, events) = run(vec![
            Ok(b"hello\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::Other, "device gone")),
        ]);

        let state = shared.lock().unwrap();
        assert!(!state.running);
        assert_eq!(state.last_error.as_deref(), Some("device gone"));
        assert_eq!(state.buffer.lines().collect::<Vec<_>>(), vec!["hello"]);
        assert_eq!(
            events,
            vec![
                SessionEvent::Output(7),
                SessionEvent::Exited {
                    id: 7,
                    error: Some("device gone".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let (shared, events) = run(vec![
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(b"ok\n".to_vec()),
        ]);

        let state = shared.lock().unwrap();
        assert_eq!(state.last_error, None);
        assert_eq!(state.buffer.lines().collect::<Vec<_>>(), vec!["ok"]);
        assert_eq!(events.last(), Some(&SessionEvent::Exited { id: 7, error: None }));
    }

    #[cfg(unix)]
    #[test]
    fn test_eio_is_a_clean_exit() {
        let eio = io::Error::from_raw_os_error(nix::errno::Errno::EIO as i32);
        let (shared, events) = run(vec![Err(eio)]);

        let state = shared.lock().unwrap();
        assert!(!state.running);
        assert_eq!(state.last_error, None);
        assert_eq!(events, vec![SessionEvent::Exited { id: 7, error: None }]);
    }
}
