use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use commons_engine::config::Config;
use commons_engine::engine::{Engine, InMemoryStore, Snapshot};
use commons_engine::rules::{JsonRuleFile, RuleConfig, RuleConfigSource};
use commons_engine::wire;

fn load_snapshot(path: &Path) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries protocol responses
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let config = Config::from_env();
    commons_engine::observability::init(config.metrics_port);

    let store = match &config.data_file {
        Some(path) => InMemoryStore::from_snapshot(load_snapshot(path)?)?,
        None => InMemoryStore::new(),
    };
    let rules: Arc<dyn RuleConfigSource> = match &config.rules_file {
        Some(path) => Arc::new(JsonRuleFile::new(path)),
        None => Arc::new(Vec::<RuleConfig>::new()),
    };

    info!("commons-engine ready");
    info!(
        "  data: {}",
        config
            .data_file
            .as_ref()
            .map_or("none".to_string(), |p| p.display().to_string())
    );
    info!("  timeframes: {}, bookings: {}", store.timeframe_count(), store.booking_count());
    info!("  count canceled: {}", config.settings.count_canceled);

    let engine = Engine::new(Arc::new(store), config.settings.clone(), rules);
    if let Err(e) = engine.validate_rules() {
        warn!("rule configuration: {e}");
    }

    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = wire::handle_line(&engine, &line, Local::now().naive_local());
        serde_json::to_writer(&mut out, &response)?;
        writeln!(out)?;
        out.flush()?;
    }

    info!("commons-engine stopped");
    Ok(())
}
