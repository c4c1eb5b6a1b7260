use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CollectorError;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Scheduling and pagination settings of the collector
// - The security server used to relay monitoring queries
// - Where collected records are written
// - Optional heartbeat output
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,

    pub security_server: SecurityServerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Optional heartbeat for external application monitoring
    pub heartbeat: Option<HeartbeatConfig>,
}

impl Config {
    /// Checks relations between fields that serde cannot express.
    pub fn validate(&self) -> Result<(), CollectorError> {
        let c = &self.collector;

        if c.thread_count == 0 {
            return Err(CollectorError::Config("thread_count must be at least 1".into()));
        }
        if c.records_to_offset >= c.records_from_offset {
            return Err(CollectorError::Config(format!(
                "records_to_offset ({}) must be smaller than records_from_offset ({})",
                c.records_to_offset, c.records_from_offset
            )));
        }
        match Duration::try_from_secs_f64(c.timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => {}
            _ => {
                return Err(CollectorError::Config(format!(
                    "timeout_secs must be a positive number of seconds, got {}",
                    c.timeout_secs
                )));
            }
        }
        if self.security_server.url.trim().is_empty() {
            return Err(CollectorError::Config("security_server.url is empty".into()));
        }

        Ok(())
    }
}

// ------------------------------------------------------------
// Collector configuration
// ------------------------------------------------------------
//
// Notes:
// - `records_to_offset` should exceed the servers'
//   records-available-timestamp-offset (60s by default).
// - A low `repeat_limit` on a rarely scheduled collector lets
//   busy servers fall behind.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    /// Number of concurrent workers
    pub thread_count: usize,

    /// History requested on the first query of a server (seconds)
    pub records_from_offset: i64,

    /// Safety margin behind "now" for the window end (seconds)
    pub records_to_offset: i64,

    /// Minimum batch size that triggers a continuation query
    pub repeat_min_records: usize,

    /// Continuations allowed per server per run (0 disables)
    pub repeat_limit: u32,

    /// Per-fetch network timeout (seconds)
    pub timeout_secs: f64,

    /// File holding the per-server continuation positions
    pub cursor_file: PathBuf,
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            thread_count: 4,
            records_from_offset: 604_800,
            records_to_offset: 100,
            repeat_min_records: 50,
            repeat_limit: 100,
            timeout_secs: 10.0,
            cursor_file: PathBuf::from("nextRecordsFrom.json"),
        }
    }
}

// ------------------------------------------------------------
// Security server configuration
// ------------------------------------------------------------
//
// All queries are sent through one local security server,
// identifying as the monitoring client subsystem below.
//
#[derive(Debug, Deserialize, Clone)]
pub struct SecurityServerConfig {
    /// HTTP(S) URL of the local security server
    pub url: String,

    pub client: MonitoringClient,
}

/// Subsystem registered as the central monitoring client.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringClient {
    pub instance: String,

    /// One of GOV, COM, NGO, NEE
    pub member_class: String,

    pub member_code: String,

    pub subsystem_code: String,
}

// ------------------------------------------------------------
// Output configuration
// ------------------------------------------------------------
//
// Records land in <log_path>/YYYY/MM/DD/<server>.log, rotated
// by size. A backup_count of 0 disables rotation.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub log_path: PathBuf,

    pub max_bytes: u64,

    pub backup_count: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("./"),
            max_bytes: 100_000_000,
            backup_count: 100,
        }
    }
}

// ------------------------------------------------------------
// Heartbeat configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    /// File overwritten with the run status
    pub path: PathBuf,

    #[serde(default = "default_module")]
    pub module: String,
}

fn default_module() -> String {
    "collector".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "security_server": {
            "url": "http://10.0.0.1",
            "client": {
                "instance": "EE",
                "member_class": "GOV",
                "member_code": "70006317",
                "subsystem_code": "monitoring"
            }
        }
    }"#;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.collector.thread_count, 4);
        assert_eq!(cfg.collector.records_from_offset, 604_800);
        assert_eq!(cfg.collector.repeat_limit, 100);
        assert_eq!(cfg.collector.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.output.backup_count, 100);
        assert!(cfg.heartbeat.is_none());
    }

    #[test]
    fn rejects_inverted_offsets() {
        let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        cfg.collector.records_to_offset = cfg.collector.records_from_offset;
        assert!(matches!(cfg.validate(), Err(CollectorError::Config(_))));
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        cfg.collector.thread_count = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unrepresentable_timeouts() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e20] {
            let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();
            cfg.collector.timeout_secs = secs;
            assert!(
                matches!(cfg.validate(), Err(CollectorError::Config(_))),
                "timeout_secs {} accepted",
                secs
            );
        }
    }

    #[test]
    fn heartbeat_module_defaults() {
        let json = MINIMAL.replacen('{', r#"{"heartbeat": {"path": "/tmp/hb.json"},"#, 1);
        let cfg: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.heartbeat.unwrap().module, "collector");
    }
}
