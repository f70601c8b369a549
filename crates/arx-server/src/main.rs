//! Arx engine server
//!
//! Loads the engine configuration, wires the rule engine and workflow
//! dispatcher to the event bus, and feeds it events read as JSON lines from
//! stdin:
//!
//! ```text
//! {"event_type": "sensor_reading", "data": {"sensor": "boiler", "temperature": 42}}
//! ```
//!
//! Usage: `arx-engine [config.yaml]`

mod dispatch_service;

use anyhow::{Context, Result};
use arx_config::{EngineConfig, LoggingConfig};
use arx_core::Event;
use arx_event_bus::EventBus;
use arx_rules::RuleEngine;
use arx_workflow::{InMemoryWorkflowStore, LoggingRunner, TimeoutRunner, TriggerDispatcher};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dispatch_service::DispatchService;

/// One line of input
#[derive(Debug, Deserialize)]
struct InputEvent {
    event_type: String,
    #[serde(default)]
    data: Value,
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("invalid log level '{}'", logging.level))?;

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Fire every valid stdin line on the bus; returns the number fired
async fn read_events(bus: Arc<EventBus>) -> Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut fired = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InputEvent>(line) {
            Ok(input) => {
                bus.fire(Event::new(input.event_type, input.data));
                fired += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed event line"),
        }
    }

    Ok(fired)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    init_tracing(&config.logging)?;

    info!("Starting arx engine");

    let mut engine = RuleEngine::new(config.rule_engine.clone());
    let summary = engine.import_rules(config.rules.clone(), false);
    for problem in &summary.errors {
        warn!(error = %problem, "Rule import error");
    }
    info!(
        imported = summary.imported_count,
        skipped = summary.skipped_count,
        errors = summary.error_count,
        "Loaded rules"
    );

    let store = Arc::new(InMemoryWorkflowStore::new());
    for workflow in config.workflow_definitions()? {
        store.insert(workflow);
    }
    info!(workflows = store.len(), "Loaded workflows");

    let dispatcher = Arc::new(
        TriggerDispatcher::new(
            store,
            Arc::new(TimeoutRunner::new(LoggingRunner)),
            config.dispatcher.clone(),
        )
        .with_rule_engine(Arc::new(RwLock::new(engine))),
    );

    let bus = Arc::new(EventBus::new());
    let service = DispatchService::new(bus.clone(), dispatcher.clone()).with_pattern_interval(
        Duration::from_secs(config.service.pattern_scan_interval_seconds),
    );
    let service_handle = service.start();

    info!("Arx engine is running");

    let reader = tokio::spawn(read_events(bus.clone()));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c");
        }
        result = reader => match result {
            Ok(Ok(fired)) => info!(events = fired, "Input closed"),
            Ok(Err(e)) => error!(error = %e, "Failed reading input"),
            Err(e) => error!(error = %e, "Input reader panicked"),
        },
    }

    info!("Shutting down...");
    service.stop();
    if let Some(handle) = service_handle {
        handle.await?;
    }
    dispatcher.wait_idle().await;

    let stats = dispatcher.statistics().await;
    info!(
        events = stats.events_processed,
        breaches = stats.threshold_breaches,
        started = stats.executions_started,
        completed = stats.executions_completed,
        failed = stats.executions_failed,
        timed_out = stats.executions_timed_out,
        dropped = stats.dropped_ceiling + stats.dropped_saturated,
        "Dispatcher statistics"
    );
    info!(
        scans = service.pattern_scans(),
        last_scan_patterns = service.latest_patterns().await.len(),
        "Pattern scan statistics"
    );

    Ok(())
}
