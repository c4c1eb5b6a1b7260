use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::schema::{Heartbeat, RunStatus};
use crate::util;

/// Overwrites the heartbeat file with the outcome of this run.
pub fn write(path: &Path, module: &str, status: RunStatus, msg: &str) -> Result<()> {
    let heartbeat = Heartbeat {
        timestamp: util::now_secs(),
        local_timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z").to_string(),
        module: module.to_string(),
        msg: msg.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string(&heartbeat).context("serialize heartbeat")?;
    fs::write(path, json).with_context(|| format!("write heartbeat: {}", path.display()))?;
    Ok(())
}
