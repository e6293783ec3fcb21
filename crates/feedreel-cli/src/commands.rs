//! CLI command implementations

use crate::host::HttpHost;
use crate::output::{self, OutputFormat};
use anyhow::Context;
use feedreel_core::{
    backend::select_backend, parse_catalog, HttpCatalogSource, HttpProbe, JsonFileStore,
    MemoryStore, NetworkMonitor, Notice, PersistentStore, PlaybackController, ReachabilityProbe,
    SessionConfig, SessionEvent, SessionStatus,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Load session configuration, falling back to defaults
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: SessionConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Parse a catalog file and list its entries
pub fn parse(file: &Path, format: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading catalog {}", file.display()))?;
    let catalog = parse_catalog(&text)?;

    match OutputFormat::from(format) {
        OutputFormat::Json => output::print_json(&catalog),
        OutputFormat::Text => {
            println!("Catalog: {} entries", catalog.len());
            for (i, entry) in catalog.entries().iter().enumerate() {
                let route = select_backend(&entry.url)
                    .map(|(_, kind)| kind.to_string())
                    .unwrap_or_else(|e| format!("invalid ({})", e));
                println!("  {:>3}. #{} [{}] {}", i, entry.id, route, entry.url);
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ProbeReport {
    url: String,
    backend: Option<String>,
    reachable: bool,
    reason: Option<String>,
}

/// Probe one source URL
pub async fn probe(url: &str, timeout_ms: u64, format: &str) -> anyhow::Result<()> {
    let backend = select_backend(url).map(|(_, kind)| kind.to_string());
    let probe = HttpProbe::new(Duration::from_millis(timeout_ms))?;
    let outcome = probe.probe(url).await;

    let report = ProbeReport {
        url: url.to_string(),
        backend: backend.as_ref().ok().cloned(),
        reachable: outcome.is_ok(),
        reason: outcome.err().map(|f| f.reason),
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => output::print_json(&report),
        OutputFormat::Text => {
            println!("Source: {}", report.url);
            match &backend {
                Ok(kind) => println!("  Backend: {}", kind),
                Err(e) => println!("  Backend: none ({})", e),
            }
            match &report.reason {
                None => println!("  Reachable: yes"),
                Some(reason) => println!("  Reachable: no ({})", reason),
            }
        }
    }

    if !report.reachable || backend.is_err() {
        std::process::exit(1);
    }

    Ok(())
}

/// Options for a headless playback run
pub struct PlayOptions {
    pub dwell_secs: u64,
    pub state: Option<PathBuf>,
    pub max_plays: usize,
    pub link_type: Option<String>,
    pub validate: bool,
}

/// Walk a remote feed until interrupted, exhausted, or `max_plays` is reached
pub async fn play(
    catalog_url: &str,
    mut config: SessionConfig,
    options: PlayOptions,
    format: &str,
) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    if options.validate {
        config.validate_sources = true;
    }

    let store: Arc<dyn PersistentStore> = match &options.state {
        Some(path) => Arc::new(
            JsonFileStore::open(path)
                .with_context(|| format!("opening state {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let monitor = NetworkMonitor::default();
    if let Some(link_type) = &options.link_type {
        monitor.update_link_type(link_type);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let host = Arc::new(HttpHost::new(
        client,
        Duration::from_secs(options.dwell_secs.max(1)),
    ));

    let mut builder = PlaybackController::builder(config.clone())
        .catalog_source(Arc::new(HttpCatalogSource::new(catalog_url)?))
        .store(store)
        .network(monitor.subscribe())
        .host(host);
    if config.validate_sources {
        builder = builder.probe(Arc::new(HttpProbe::new(config.validation_timeout())?));
    }
    let controller = builder.build()?;

    info!(session_id = %controller.id(), catalog_url, "Starting playback run");
    let mut events = controller.subscribe();
    let (handle, task) = controller.spawn();

    let mut played = 0usize;
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
            record = events.recv() => match record {
                Ok(record) => {
                    output::print_event(&record, format);
                    match &record.event {
                        SessionEvent::StatusChanged { to: SessionStatus::Playing, .. } => {
                            played += 1;
                            if options.max_plays > 0 && played >= options.max_plays {
                                break Ok(());
                            }
                        }
                        SessionEvent::StatusChanged { to: SessionStatus::Exhausted, .. } => {
                            break Err(anyhow::anyhow!("no playable sources in the catalog"));
                        }
                        SessionEvent::Notice(Notice::CatalogUnavailable) => {
                            break Err(anyhow::anyhow!("catalog unavailable"));
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output fell behind"),
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    if handle.shutdown().await.is_err() {
        warn!("Session already closed");
    }
    task.await?;

    if format == OutputFormat::Text {
        println!("Played {} source(s)", played);
    }
    outcome
}
