//! Persisted per-server continuation positions (`nextRecordsFrom`).
//!
//! The store is loaded once at startup, updated after every successful
//! fetch and checkpointed to disk on each update, so a crash mid-run only
//! loses the fetches that were still in flight.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::Serialize;
use serde_json::Value;

use crate::error::CollectorError;

pub struct CursorStore {
    path: PathBuf,
    checkpoint: bool,
    state: Mutex<Positions>,
    /// Version of the newest mapping on disk. Held for the whole write so
    /// checkpoints never overtake each other.
    written: Mutex<u64>,
}

#[derive(Default)]
struct Positions {
    map: BTreeMap<String, String>,
    version: u64,
}

impl CursorStore {
    /// Loads positions from `path`. A missing file means a first run for
    /// every server. An unreadable or corrupt file is an error: silently
    /// starting over would re-query the default history window for all
    /// servers.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let positions = match fs::read(&path) {
            Ok(bytes) => parse_positions(&bytes)
                .with_context(|| format!("parse cursor file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("read cursor file: {}", path.display()));
            }
        };

        debug!("Loaded {} cursors from {}", positions.len(), path.display());

        Ok(Self {
            path,
            checkpoint: true,
            state: Mutex::new(Positions {
                map: positions,
                version: 0,
            }),
            written: Mutex::new(0),
        })
    }

    /// In-memory store that never touches the disk until `persist`.
    #[cfg(test)]
    pub fn in_memory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            checkpoint: false,
            state: Mutex::new(Positions::default()),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, descriptor: &str) -> Option<String> {
        self.lock().map.get(descriptor).cloned()
    }

    /// Records a new position for `descriptor` in memory.
    ///
    /// Entries are never removed. When both the current and the new value
    /// are numeric the larger one is kept, so a late update can never move
    /// a cursor backwards. Opaque tokens are last-writer-wins. Returns
    /// whether the mapping changed.
    pub fn set(&self, descriptor: &str, position: String) -> bool {
        let mut state = self.lock();

        if let Some(current) = state.map.get(descriptor) {
            if let (Ok(old), Ok(new)) = (current.parse::<u64>(), position.parse::<u64>()) {
                if new < old {
                    debug!(
                        "Ignoring cursor rollback for {}: {} -> {}",
                        descriptor, old, new
                    );
                    return false;
                }
            }
        }

        state.map.insert(descriptor.to_string(), position);
        state.version += 1;
        true
    }

    /// `set` followed by a checkpoint of the whole mapping.
    ///
    /// The file is written on the blocking pool, outside the position
    /// lock. A failed checkpoint is logged; the shutdown `persist` still
    /// has to succeed for the run to succeed.
    pub async fn update(self: &Arc<Self>, descriptor: &str, position: String) {
        if !self.set(descriptor, position) || !self.checkpoint {
            return;
        }

        let store = Arc::clone(self);
        match tokio::task::spawn_blocking(move || store.checkpoint()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Cursor checkpoint failed: {}", e),
            Err(e) => error!("Cursor checkpoint task failed: {}", e),
        }
    }

    /// Writes the current mapping unless a newer one is already on disk.
    fn checkpoint(&self) -> Result<(), CollectorError> {
        let mut written = self.lock_written();
        let (version, snapshot) = {
            let state = self.lock();
            (state.version, state.map.clone())
        };
        if version <= *written {
            return Ok(());
        }

        write_atomic(&self.path, &snapshot)?;
        *written = version;
        Ok(())
    }

    /// Writes the whole mapping to the backing file.
    ///
    /// Keys are sorted and indented so the file diffs cleanly between runs.
    pub fn persist(&self) -> Result<(), CollectorError> {
        let mut written = self.lock_written();
        let (version, snapshot) = {
            let state = self.lock();
            (state.version, state.map.clone())
        };

        write_atomic(&self.path, &snapshot)?;
        *written = version;
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().map.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    fn lock(&self) -> MutexGuard<'_, Positions> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_written(&self) -> MutexGuard<'_, u64> {
        self.written.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Accepts both string and numeric positions (older files stored numbers).
fn parse_positions(bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    let raw: BTreeMap<String, Value> = serde_json::from_slice(bytes)?;
    raw.into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            Value::Number(n) => Ok((key, n.to_string())),
            other => Err(anyhow::anyhow!("unexpected cursor value for {}: {}", key, other)),
        })
        .collect()
}

/// Temp file + fsync + rename, so readers only ever see a complete file.
fn write_atomic(path: &Path, positions: &BTreeMap<String, String>) -> Result<(), CollectorError> {
    let persist_err = |source| CollectorError::Persist {
        path: path.display().to_string(),
        source,
    };

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    positions
        .serialize(&mut ser)
        .map_err(|e| persist_err(std::io::Error::other(e)))?;
    buf.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(persist_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp).map_err(persist_err)?;
    file.write_all(&buf).map_err(persist_err)?;
    file.sync_all().map_err(persist_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(persist_err)
}
