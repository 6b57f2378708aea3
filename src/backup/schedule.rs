//! Cron due-ness and the persisted last-fired timestamps.
//!
//! The state file holds `cron: {<location>: <unix seconds>}`. Every access goes
//! through a [`ScheduleGuard`], which keeps an exclusive OS-level lock on a
//! sibling `.lock` file until it is dropped, so a read-decide-write cycle
//! cannot interleave with another process doing the same. Writes go to a
//! temporary file that is renamed over the state file.

use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidCron(String);

pub fn next_firing(cron: &str, after: DateTime<Utc>) -> std::result::Result<DateTime<Utc>, InvalidCron> {
    cron_parser::parse(cron.trim(), &after).map_err(|e| InvalidCron(format!("{e:?}")))
}

/// A location is due when its schedule had an occurrence after `last_fired`
/// and not later than `now`. A missing `last_fired` counts as the epoch.
pub fn is_due(
    cron: &str,
    last_fired: Option<i64>,
    now: DateTime<Utc>,
) -> std::result::Result<bool, InvalidCron> {
    if cron.trim().is_empty() {
        return Ok(false);
    }
    let last_fired = last_fired
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or(DateTime::UNIX_EPOCH);

    Ok(next_firing(cron, last_fired)? <= now)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ScheduleState {
    #[serde(default)]
    cron: BTreeMap<String, i64>,
}

#[derive(Clone, Debug)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file carrying the OS lock, so the state file itself can be
    /// replaced by rename.
    pub fn lock_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// Blocks until the store can be locked exclusively, then loads it.
    pub fn lock(&self) -> Result<ScheduleGuard> {
        self.open_locked()
            .with_msg(format!("Failed to open schedule state {:?}", self.path))
    }

    fn open_locked(&self) -> Result<ScheduleGuard> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;
        lock_file.lock_exclusive()?;

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let state = if contents.trim().is_empty() {
            ScheduleState::default()
        } else {
            serde_yml::from_str(&contents)?
        };
        tracing::trace!("Locked schedule state {:?}", self.path);

        Ok(ScheduleGuard {
            lock_file,
            path: self.path.clone(),
            state,
        })
    }
}

/// Locked view of the schedule state. The lock is released on drop.
#[derive(Debug)]
pub struct ScheduleGuard {
    lock_file: File,
    path: PathBuf,
    state: ScheduleState,
}

impl ScheduleGuard {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.state.cron.get(name).copied()
    }

    /// Records `timestamp` for `name` and replaces the state file with the
    /// whole new state. Readers see either the old file or the new one.
    pub fn set(&mut self, name: &str, timestamp: i64) -> Result<()> {
        self.state.cron.insert(name.to_string(), timestamp);
        let contents = serde_yml::to_string(&self.state)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Drop for ScheduleGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
    }
}
