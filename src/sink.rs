//! Per-server append-only record logs with size-based rotation.
//!
//! Layout: `<log_path>/YYYY/MM/DD/<normalized server>.log`, one compact
//! JSON record per line. Rotated files are `<name>.log.1` (newest) up to
//! `<name>.log.<backup_count>` (oldest).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;
use serde_json::Value;

use crate::config::OutputConfig;
use crate::identity::ServerIdentity;

/// Destination for collected records, keyed by server identity.
///
/// Implementations must be safe to call from several workers at once;
/// calls for the same identity never overlap in practice.
pub trait RecordSink: Send + Sync {
    fn append(&self, identity: &ServerIdentity, records: &[Value]) -> io::Result<()>;
}

// ------------------------------------------------------------
// Rotating log file
// ------------------------------------------------------------
#[derive(Debug)]
pub struct RotatingLog {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    backup_count: usize,
}

impl RotatingLog {
    pub fn open(path: PathBuf, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            size,
            max_bytes,
            backup_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `line` plus a newline, rotating first if the file would
    /// reach `max_bytes`.
    pub fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let len = line.len() as u64 + 1;
        if self.should_rotate(len) {
            self.rotate()?;
        }

        self.file.write_all(line)?;
        self.file.write_all(b"\n")?;
        self.size += len;
        Ok(())
    }

    fn should_rotate(&self, incoming: u64) -> bool {
        self.max_bytes > 0
            && self.backup_count > 0
            && self.size > 0
            && self.size + incoming >= self.max_bytes
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        for i in (1..self.backup_count).rev() {
            let src = self.backup_path(i);
            if src.exists() {
                fs::rename(&src, self.backup_path(i + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.size = 0;

        debug!("Rotated {}", self.path.display());
        Ok(())
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }
}

// ------------------------------------------------------------
// Sink registry
// ------------------------------------------------------------
//
// Hands out exactly one log per server for the whole run, so
// continuation queries append to the same handle instead of
// opening a second one.
//
pub struct SinkRegistry {
    dir: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    logs: Mutex<HashMap<String, Arc<Mutex<RotatingLog>>>>,
}

impl SinkRegistry {
    /// Registry writing under today's `YYYY/MM/DD` directory.
    pub fn new(cfg: &OutputConfig) -> Self {
        let day = chrono::Local::now().format("%Y/%m/%d").to_string();
        Self::with_dir(cfg.log_path.join(day), cfg.max_bytes, cfg.backup_count)
    }

    pub fn with_dir(dir: PathBuf, max_bytes: u64, backup_count: usize) -> Self {
        Self {
            dir,
            max_bytes,
            backup_count,
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the log for `identity`, opening it on first use.
    pub fn get_or_create(&self, identity: &ServerIdentity) -> io::Result<Arc<Mutex<RotatingLog>>> {
        let mut logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(log) = logs.get(identity.normalized()) {
            return Ok(log.clone());
        }

        let path = self.dir.join(format!("{}.log", identity.normalized()));
        let log = Arc::new(Mutex::new(RotatingLog::open(
            path,
            self.max_bytes,
            self.backup_count,
        )?));
        logs.insert(identity.normalized().to_string(), log.clone());

        debug!("[{}] Attached record log", identity);
        Ok(log)
    }
}

impl RecordSink for SinkRegistry {
    fn append(&self, identity: &ServerIdentity, records: &[Value]) -> io::Result<()> {
        let log = self.get_or_create(identity)?;
        let mut log = log.lock().unwrap_or_else(|p| p.into_inner());

        for record in records {
            let line = serde_json::to_vec(record).map_err(io::Error::other)?;
            log.write_line(&line)?;
        }
        log.file.flush()
    }
}
