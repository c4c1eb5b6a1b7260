use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{error, info};

use opmon_collector::collector::{Collector, FetchOperation, FetchSettings};
use opmon_collector::config::Config;
use opmon_collector::cursor::CursorStore;
use opmon_collector::heartbeat;
use opmon_collector::identity::parse_server_list;
use opmon_collector::metrics::{MetricsSnapshot, RunMetrics};
use opmon_collector::schema::RunStatus;
use opmon_collector::sink::SinkRegistry;
use opmon_collector::util;
use opmon_collector::xroad::SoapFetcher;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// One collection run, meant to be started periodically by an
// external scheduler:
//
//     opmon-collector [config.json] < servers.txt
//
// Responsibilities:
// - Initialize logging
// - Load and validate configuration
// - Read the server list from stdin
// - Run the collector until every queue has drained
// - Report the outcome (summary line + heartbeat)
//
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = load_config(&config_path)?;
    let heartbeat_cfg = config.heartbeat.clone();

    info!("Starting collector - Version {}", env!("CARGO_PKG_VERSION"));
    let started = Instant::now();

    let (status, msg, result) = match collect(config).await {
        Ok(summary) => {
            info!(
                "Records: {}, continuations: {}, exhausted repeats: {}, malformed lines: {}",
                summary.records_collected,
                summary.continuations,
                summary.budget_exhausted,
                summary.malformed_lines
            );
            let msg = format!(
                "Total collected: {}, Total error: {}, Total time: {}",
                summary.servers_done,
                summary.fetch_failures,
                util::format_elapsed(started.elapsed())
            );
            info!("{}", msg);
            (RunStatus::Succeeded, msg, Ok(()))
        }
        Err(e) => {
            error!("Collector failed: {:#}", e);
            (RunStatus::Failed, format!("{:#}", e), Err(e))
        }
    };

    if let Some(hb) = heartbeat_cfg {
        if let Err(e) = heartbeat::write(&hb.path, &hb.module, status, &msg) {
            error!("Cannot write heartbeat: {:#}", e);
        }
    }

    result
}

async fn collect(config: Config) -> Result<MetricsSnapshot> {
    let metrics = Arc::new(RunMetrics::default());

    let (servers, rejected) =
        parse_server_list(std::io::stdin().lock()).context("read server list from stdin")?;
    metrics.malformed_lines.fetch_add(rejected, Ordering::Relaxed);

    let cursors = Arc::new(CursorStore::load(&config.collector.cursor_file)?);

    let sink = Arc::new(SinkRegistry::new(&config.output));
    info!("Writing records under {}", sink.dir().display());

    let fetcher = Arc::new(SoapFetcher::new(
        &config.security_server,
        config.collector.timeout(),
    )?);

    let operation = FetchOperation::new(
        fetcher,
        sink,
        cursors.clone(),
        metrics.clone(),
        FetchSettings::from(&config.collector),
    );

    let summary = Collector::new(&config.collector, operation, cursors, metrics)
        .run(servers)
        .await
        .context("cursor state was not saved")?;

    Ok(summary)
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk, deserializes it
// into `Config` and checks the cross-field constraints.
//
fn load_config(path: &str) -> Result<Config> {
    let data = fs::read_to_string(path).with_context(|| format!("read config: {}", path))?;
    let cfg: Config =
        serde_json::from_str(&data).with_context(|| format!("parse config: {}", path))?;
    cfg.validate()?;
    Ok(cfg)
}
