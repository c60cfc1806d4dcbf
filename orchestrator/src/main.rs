//! Scheduler entry point: loads the scan configuration, builds both engine
//! adapters from the environment and ticks every assignment until all of
//! them settle.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::config::AppConfig;
use common::logger::init_logger;
use engines::{JplagAdapter, JplagConfig, MossAdapter, MossConfig, ProxyConfig};
use store::{MemoryReportStore, MemoryScanJobStore, ReportStore, ScanJobStore};

use orchestrator::{
    AssignmentScan, EngineSet, FsExtractor, MemoryScanSchedule, ScanOrchestrator,
};

fn load_scans(path: &str) -> Result<Vec<AssignmentScan>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {path}"))
}

fn build_engines(reports: Arc<dyn ReportStore>) -> EngineSet {
    let cfg = AppConfig::global().clone();

    let moss_config = MossConfig {
        user_id: cfg.moss_user_id.clone(),
        server: cfg.moss_server.clone(),
        port: cfg.moss_port,
        proxy: (!cfg.proxy_host.is_empty()).then(|| ProxyConfig {
            host: cfg.proxy_host.clone(),
            port: cfg.proxy_port,
        }),
        ..MossConfig::default()
    };
    let jplag_config = JplagConfig {
        base_url: cfg.jplag_base_url.clone(),
        username: cfg.jplag_username.clone(),
        password: cfg.jplag_password.clone(),
        ..JplagConfig::default()
    };

    EngineSet {
        moss: Arc::new(MossAdapter::new(moss_config, reports.clone())),
        jplag: Arc::new(JplagAdapter::new(jplag_config, reports)),
    }
}

#[tokio::main]
async fn main() {
    let cfg = AppConfig::global().clone();
    init_logger(&cfg.log_level, &cfg.log_file, cfg.log_to_stdout);

    let scans_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "scans.json".into());
    let scans = match load_scans(&scans_path) {
        Ok(scans) => scans,
        Err(e) => {
            log::error!("cannot load scan configuration: {e:#}");
            std::process::exit(1);
        }
    };
    log::info!(
        "{} starting with {} assignments from {scans_path}",
        cfg.project_name,
        scans.len()
    );

    let storage_root = PathBuf::from(&cfg.storage_root);
    let jobs: Arc<dyn ScanJobStore> = Arc::new(MemoryScanJobStore::new());
    let reports: Arc<dyn ReportStore> = Arc::new(MemoryReportStore::new());
    let extractor = Arc::new(FsExtractor::new(storage_root.join("extract")));
    let schedule = Arc::new(MemoryScanSchedule::new());

    let orchestrator = ScanOrchestrator::new(
        jobs,
        build_engines(reports),
        extractor,
        schedule,
        storage_root.join("reports"),
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs));
    loop {
        ticker.tick().await;
        match orchestrator.recover_stale_jobs().await {
            Ok(0) => {}
            Ok(n) => log::warn!("recovered {n} stalled scan jobs"),
            Err(e) => log::error!("stale job recovery failed: {e}"),
        }
        orchestrator.process_all(&scans).await;
        if orchestrator.all_completed(&scans).await {
            log::info!("all assignments settled, exiting");
            break;
        }
    }
}
