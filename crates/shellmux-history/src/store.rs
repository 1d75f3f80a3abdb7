use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::codec;

/// Default number of entries kept.
pub const DEFAULT_HISTORY_SIZE: usize = 10_000;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HistoryError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A history match together with its position in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub position: usize,
    pub entry: String,
}

struct Inner {
    entries: VecDeque<String>,
    capacity: usize,
    /// Navigation cursor in `0..=entries.len()`. `len` means "past the end".
    position: usize,
    /// The backing file exists but could not be read. The next save moves
    /// it aside instead of replacing it.
    unreadable: bool,
}

/// Shared command history with optional file persistence.
///
/// All methods take `&self`; state lives behind an `RwLock`, so the store
/// can be shared between sessions.
pub struct HistoryStore {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

impl HistoryStore {
    pub fn new(capacity: usize, path: Option<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: VecDeque::new(),
                capacity: capacity.max(1),
                position: 0,
                unreadable: false,
            }),
            path,
        }
    }

    /// `<config dir>/shellmux/history`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shellmux").join("history"))
    }

    /// Replace the entries with the backing file's contents.
    ///
    /// A missing file leaves the store empty and is not an error. Lines that
    /// are not valid UTF-8 are skipped. If the file cannot be read at all the
    /// store stays empty, the error is returned, and the next
    /// [`save`](Self::save) keeps the old file as `<name>.bak`.
    pub fn load(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut entries = match read_entries(path) {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                log::debug!("no history file at {}", path.display());
                return Ok(());
            }
            Err(e) => {
                self.write().unreadable = true;
                return Err(HistoryError::io(path, e));
            }
        };

        let mut inner = self.write();
        while entries.len() > inner.capacity {
            entries.pop_front();
        }
        inner.position = entries.len();
        inner.entries = entries;
        inner.unreadable = false;
        log::info!("loaded {} history entries from {}", inner.entries.len(), path.display());
        Ok(())
    }

    /// Write all entries to the backing file through a temp file and rename.
    pub fn save(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
        }

        if mem::take(&mut self.write().unreadable) && path.exists() {
            let backup = sibling_path(path, ".bak");
            fs::rename(path, &backup).map_err(|e| HistoryError::io(path, e))?;
            log::warn!(
                "kept unreadable history file as {} before saving",
                backup.display()
            );
        }

        let tmp = sibling_path(path, ".tmp");
        let count = {
            let inner = self.read();
            let mut file = io::BufWriter::new(
                fs::File::create(&tmp).map_err(|e| HistoryError::io(&tmp, e))?,
            );
            for entry in &inner.entries {
                writeln!(file, "{}", codec::encode(entry)).map_err(|e| HistoryError::io(&tmp, e))?;
            }
            file.flush().map_err(|e| HistoryError::io(&tmp, e))?;
            inner.entries.len()
        };

        fs::rename(&tmp, path).map_err(|e| HistoryError::io(path, e))?;
        log::info!("saved {count} history entries to {}", path.display());
        Ok(())
    }

    /// Record a command. Blank input is ignored and an entry equal to the
    /// most recent one is not duplicated. Either way the cursor resets.
    pub fn add(&self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }

        let mut inner = self.write();
        if inner.entries.back().map(String::as_str) != Some(entry) {
            inner.entries.push_back(entry.to_string());
            while inner.entries.len() > inner.capacity {
                inner.entries.pop_front();
            }
        }
        inner.position = inner.entries.len();
    }

    /// Step the cursor back one entry, stopping at the oldest.
    pub fn previous(&self) -> Option<String> {
        let mut inner = self.write();
        if inner.entries.is_empty() {
            return None;
        }
        if inner.position > 0 {
            inner.position -= 1;
        }
        inner.entries.get(inner.position).cloned()
    }

    /// Step the cursor forward. Moving past the newest entry parks the
    /// cursor at the end and returns `None`.
    pub fn next(&self) -> Option<String> {
        let mut inner = self.write();
        if inner.position + 1 >= inner.entries.len() {
            inner.position = inner.entries.len();
            return None;
        }
        inner.position += 1;
        inner.entries.get(inner.position).cloned()
    }

    /// Case-insensitive substring search, most recent first. An empty query
    /// returns every entry oldest first.
    pub fn search(&self, query: &str) -> Vec<String> {
        self.search_indexed(query)
            .into_iter()
            .map(|hit| hit.entry)
            .collect()
    }

    /// Like [`search`](Self::search), with each entry's position attached.
    pub fn search_indexed(&self, query: &str) -> Vec<SearchHit> {
        let inner = self.read();
        let hit = |(position, entry): (usize, &String)| SearchHit {
            position,
            entry: entry.clone(),
        };

        if query.is_empty() {
            return inner.entries.iter().enumerate().map(hit).collect();
        }

        let needle = query.to_lowercase();
        inner
            .entries
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, entry)| entry.to_lowercase().contains(&needle))
            .map(hit)
            .collect()
    }

    /// Find the nearest entry at or before `start` containing `query`.
    pub fn search_reverse(&self, query: &str, start: usize) -> Option<(String, usize)> {
        let inner = self.read();
        if inner.entries.is_empty() {
            return None;
        }
        let start = start.min(inner.entries.len() - 1);
        let needle = query.to_lowercase();
        (0..=start)
            .rev()
            .find(|&i| inner.entries[i].to_lowercase().contains(&needle))
            .map(|i| (inner.entries[i].clone(), i))
    }

    pub fn reset_position(&self) {
        let mut inner = self.write();
        inner.position = inner.entries.len();
    }

    /// Move the cursor to `position`, clamped to `len`.
    pub fn set_position(&self, position: usize) {
        let mut inner = self.write();
        inner.position = position.min(inner.entries.len());
    }

    pub fn position(&self) -> usize {
        self.read().position
    }

    pub fn entries(&self) -> Vec<String> {
        self.read().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.position = 0;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE, None)
    }
}

/// Read and decode every non-blank line. `Ok(None)` means there is no file.
fn read_entries(path: &Path) -> io::Result<Option<VecDeque<String>>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut reader = BufReader::new(file);
    let mut entries = VecDeque::new();
    let mut skipped = 0usize;
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        if raw.last() == Some(&b'\n') {
            raw.pop();
        }
        match std::str::from_utf8(&raw) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => entries.push_back(codec::decode(line)),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!(
            "skipped {skipped} undecodable lines in {}",
            path.display()
        );
    }
    Ok(Some(entries))
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "history".into());
    name.push(suffix);
    path.with_file_name(name)
}
