//! Bus-driven dispatch loop
//!
//! `DispatchService` subscribes to every event on the bus and hands each one
//! to the trigger dispatcher. It also periodically runs pattern detection
//! over the rule engine's history, logs what it finds and keeps the result
//! of the most recent scan.

use arx_event_bus::EventBus;
use arx_rules::DetectedPattern;
use arx_workflow::TriggerDispatcher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

const DEFAULT_PATTERN_SCAN_INTERVAL: Duration = Duration::from_secs(60);

pub struct DispatchService {
    event_bus: Arc<EventBus>,
    dispatcher: Arc<TriggerDispatcher>,
    pattern_interval: Duration,
    pattern_scans: Arc<AtomicU64>,
    latest_patterns: Arc<RwLock<Vec<DetectedPattern>>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DispatchService {
    pub fn new(event_bus: Arc<EventBus>, dispatcher: Arc<TriggerDispatcher>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            event_bus,
            dispatcher,
            pattern_interval: DEFAULT_PATTERN_SCAN_INTERVAL,
            pattern_scans: Arc::new(AtomicU64::new(0)),
            latest_patterns: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Time between pattern scans; a zero interval keeps the current one
    pub fn with_pattern_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("Ignoring zero pattern scan interval");
        } else {
            self.pattern_interval = interval;
        }
        self
    }

    /// Pattern scans completed since start
    pub fn pattern_scans(&self) -> u64 {
        self.pattern_scans.load(Ordering::Relaxed)
    }

    /// Patterns found by the most recent scan
    pub async fn latest_patterns(&self) -> Vec<DetectedPattern> {
        self.latest_patterns.read().await.clone()
    }

    /// Start consuming bus events
    ///
    /// Events already queued on the bus are drained before a shutdown
    /// request is honoured. Returns `None` if the service is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatch service already running");
            return None;
        }

        info!("Starting dispatch service");

        let mut event_rx = self.event_bus.subscribe_all();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        let pattern_scans = self.pattern_scans.clone();
        let latest_patterns = self.latest_patterns.clone();

        let period = self.pattern_interval;
        let mut pattern_tick = interval_at(Instant::now() + period, period);
        pattern_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    event_result = event_rx.recv() => {
                        match event_result {
                            Ok(event) => {
                                trace!(event_type = %event.event_type, event_id = %event.id, "Processing event");
                                dispatcher.handle_event(&event).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Dispatch service lagged by {} events", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("Event bus closed, stopping dispatch service");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Received shutdown signal");
                        break;
                    }
                    _ = pattern_tick.tick() => {
                        let Some(patterns) = scan_patterns(&dispatcher).await else {
                            continue;
                        };
                        pattern_scans.fetch_add(1, Ordering::Relaxed);
                        *latest_patterns.write().await = patterns;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("Dispatch service stopped");
        }))
    }

    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        info!("Stopping dispatch service");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Detect patterns over the default lookback; `None` without a rule engine
async fn scan_patterns(dispatcher: &TriggerDispatcher) -> Option<Vec<DetectedPattern>> {
    let engine = dispatcher.rule_engine()?.read().await;
    let lookback = engine.config().default_lookback_minutes;
    let patterns = engine.detect_all_patterns(lookback);
    if patterns.is_empty() {
        debug!(lookback_minutes = lookback, "No patterns detected");
        return Some(patterns);
    }

    for pattern in &patterns {
        info!(
            kind = pattern.kind().as_str(),
            field = pattern.field(),
            details = ?pattern,
            "Pattern detected"
        );
    }
    Some(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_core::Event;
    use arx_rules::{Operator, PatternKind, RuleEngine, RuleEngineConfig, Severity};
    use arx_workflow::{
        DispatcherConfig, ExecutionStatus, InMemoryWorkflowStore, LoggingRunner, TriggerType,
        Workflow, WorkflowStatus, WorkflowTrigger,
    };
    use serde_json::json;
    use tokio::sync::RwLock;

    fn setup() -> (Arc<EventBus>, Arc<TriggerDispatcher>) {
        let mut engine = RuleEngine::new(RuleEngineConfig::default());
        engine
            .create_threshold_rule("Overheat", "temperature", 30.0, Operator::GreaterThan, None)
            .unwrap();

        let store = Arc::new(InMemoryWorkflowStore::new());
        store.insert(
            Workflow::new("wf-cool", "Cool down")
                .with_status(WorkflowStatus::Active)
                .with_trigger(WorkflowTrigger::new(TriggerType::ThresholdBreach, "Overheat")),
        );

        let dispatcher = TriggerDispatcher::new(
            store,
            Arc::new(LoggingRunner),
            DispatcherConfig::default(),
        )
        .with_rule_engine(Arc::new(RwLock::new(engine)));

        (Arc::new(EventBus::new()), Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn test_bus_event_reaches_workflow() {
        let (bus, dispatcher) = setup();
        let mut completions = dispatcher.subscribe_completions();
        let service = DispatchService::new(bus.clone(), dispatcher.clone());
        let handle = service.start().unwrap();
        assert!(service.is_running());
        assert!(service.start().is_none());

        bus.fire(Event::new("sensor_reading", json!({"temperature": 35})));

        let finished = tokio::time::timeout(Duration::from_secs(5), completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished.workflow_id, "wf-cool");
        assert_eq!(finished.status, ExecutionStatus::Completed);

        service.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_queued_events_drained_before_stop() {
        let (bus, dispatcher) = setup();
        let service = DispatchService::new(bus.clone(), dispatcher.clone());
        let handle = service.start().unwrap();

        for reading in [12, 14, 16] {
            bus.fire(Event::new("sensor_reading", json!({"temperature": reading})));
        }
        service.stop();
        handle.await.unwrap();

        let stats = dispatcher.statistics().await;
        assert_eq!(stats.events_processed, 3);
        let engine = dispatcher.rule_engine().unwrap().read().await;
        assert_eq!(engine.history().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_scan_reports_spike() {
        let (bus, dispatcher) = setup();
        let service = DispatchService::new(bus.clone(), dispatcher.clone())
            .with_pattern_interval(Duration::from_secs(10));
        let handle = service.start().unwrap();

        for reading in [10, 10, 50] {
            bus.fire(Event::new("sensor_reading", json!({"temperature": reading})));
        }

        // The first scan runs one interval after start
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(service.pattern_scans(), 0);
        assert_eq!(dispatcher.statistics().await.events_processed, 3);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(service.pattern_scans(), 1);

        let patterns = service.latest_patterns().await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind(), PatternKind::Spike);
        assert_eq!(patterns[0].field(), "temperature");
        let DetectedPattern::Spike(spike) = &patterns[0] else {
            panic!("expected spike, got {:?}", patterns[0]);
        };
        assert_eq!(spike.spike_value, 50.0);
        assert_eq!(spike.baseline_average, 10.0);
        assert_eq!(spike.severity, Severity::High);

        service.stop();
        handle.await.unwrap();
    }
}
