//! User configuration, read from `<config dir>/shellmux/config.json`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shellmux_history::{HistoryStore, DEFAULT_HISTORY_SIZE};
use shellmux_pty::{PtySize, SpawnCommand};
use shellmux_scrollback::DEFAULT_CAPACITY;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Program for new local tabs. `None` means `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    pub shell_args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub scrollback_lines: usize,
    pub history_size: usize,
    /// Overrides [`HistoryStore::default_path`].
    pub history_file: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            shell_args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            scrollback_lines: DEFAULT_CAPACITY,
            history_size: DEFAULT_HISTORY_SIZE,
            history_file: None,
            rows: 24,
            cols: 80,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shellmux").join("config.json"))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the default location, or use the defaults if there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// The command new local tabs run.
    pub fn spawn_command(&self) -> SpawnCommand {
        let mut command = match &self.shell {
            Some(shell) => SpawnCommand::new(shell.clone()),
            None => SpawnCommand::default_shell(),
        };
        command = command.args(self.shell_args.iter().cloned());
        for (key, value) in &self.env {
            command = command.env(key.clone(), value.clone());
        }
        if let Some(cwd) = &self.cwd {
            command = command.cwd(cwd.clone());
        }
        command
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file.clone().or_else(HistoryStore::default_path)
    }

    pub fn initial_size(&self) -> PtySize {
        PtySize::new(self.rows.max(1), self.cols.max(1))
    }
}
