//! Workflow trigger dispatcher
//!
//! For each event the dispatcher finds the active workflows whose triggers
//! match, admits one execution per matching trigger if the workflow is below
//! its concurrency ceiling, and runs it in the background. Triggers over the
//! ceiling are dropped rather than queued, and so are triggers arriving while
//! the worker pool is saturated.

use arx_core::{events, Event};
use arx_rules::{EvaluationResult, RuleEngine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, DispatchResult, RunnerError, TrackerError, WorkflowError};
use crate::execution::{Execution, ExecutionResult, ExecutionStatus};
use crate::runner::ExecutionRunner;
use crate::store::WorkflowStore;
use crate::tracker::ExecutionTracker;
use crate::workflow::{Workflow, WorkflowStatus};

/// Rule engine shared between the dispatcher and other producers
pub type SharedRuleEngine = Arc<RwLock<RuleEngine>>;

const COMPLETION_CHANNEL_CAPACITY: usize = 256;

fn default_max_workers() -> usize {
    10
}

fn default_max_concurrent_executions() -> usize {
    1
}

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Executions that may run at once across all workflows
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Ceiling for workflows that do not set `max_concurrent_executions`
    #[serde(default = "default_max_concurrent_executions")]
    pub default_max_concurrent_executions: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            default_max_concurrent_executions: default_max_concurrent_executions(),
        }
    }
}

/// What happened to one dispatched event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub event_type: String,
    /// Threshold rules that fired for a sensor reading
    pub threshold_breaches: usize,
    pub workflows_matched: usize,
    pub triggers_matched: usize,
    /// Ids of executions started
    pub started: Vec<String>,
    pub dropped_ceiling: usize,
    pub dropped_saturated: usize,
    pub errors: usize,
}

impl DispatchReport {
    fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            ..Default::default()
        }
    }

    fn merge(&mut self, other: DispatchReport) {
        self.workflows_matched += other.workflows_matched;
        self.triggers_matched += other.triggers_matched;
        self.started.extend(other.started);
        self.dropped_ceiling += other.dropped_ceiling;
        self.dropped_saturated += other.dropped_saturated;
        self.errors += other.errors;
    }
}

#[derive(Debug, Default)]
struct DispatchCounters {
    events_processed: AtomicU64,
    threshold_breaches: AtomicU64,
    triggers_matched: AtomicU64,
    executions_started: AtomicU64,
    executions_completed: AtomicU64,
    executions_failed: AtomicU64,
    executions_timed_out: AtomicU64,
    dropped_ceiling: AtomicU64,
    dropped_saturated: AtomicU64,
    dispatch_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time dispatcher statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherStatistics {
    /// Events routed through `handle_event` or `dispatch`; derived breach
    /// events are not counted
    pub events_processed: u64,
    /// Threshold rules triggered by sensor readings
    pub threshold_breaches: u64,
    pub triggers_matched: u64,
    pub executions_started: u64,
    pub executions_completed: u64,
    pub executions_failed: u64,
    pub executions_timed_out: u64,
    pub dropped_ceiling: u64,
    pub dropped_saturated: u64,
    pub dispatch_errors: u64,
    pub in_flight: usize,
    pub available_workers: usize,
}

/// State shared with spawned execution tasks
struct Shared {
    store: Arc<dyn WorkflowStore>,
    runner: Arc<dyn ExecutionRunner>,
    tracker: Arc<ExecutionTracker>,
    counters: DispatchCounters,
    completions: broadcast::Sender<Execution>,
}

/// Routes events to workflow executions
pub struct TriggerDispatcher {
    shared: Arc<Shared>,
    rule_engine: Option<SharedRuleEngine>,
    workers: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl TriggerDispatcher {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        runner: Arc<dyn ExecutionRunner>,
        config: DispatcherConfig,
    ) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store,
                runner,
                tracker: Arc::new(ExecutionTracker::new()),
                counters: DispatchCounters::default(),
                completions,
            }),
            rule_engine: None,
            workers: Arc::new(Semaphore::new(config.max_workers)),
            config,
        }
    }

    /// Evaluate threshold rules for sensor readings
    pub fn with_rule_engine(mut self, engine: SharedRuleEngine) -> Self {
        self.rule_engine = Some(engine);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.shared.tracker
    }

    pub fn rule_engine(&self) -> Option<&SharedRuleEngine> {
        self.rule_engine.as_ref()
    }

    /// Receive a snapshot of every execution that reaches a terminal state
    pub fn subscribe_completions(&self) -> broadcast::Receiver<Execution> {
        self.shared.completions.subscribe()
    }

    /// Route a bus event
    ///
    /// Sensor readings are first run through the threshold rules; each
    /// triggered rule is dispatched as a `threshold_breach` event before the
    /// reading itself.
    pub async fn handle_event(&self, event: &Event) -> DispatchReport {
        let counters = &self.shared.counters;
        bump(&counters.events_processed);
        let event_type = event.event_type.as_str();
        let mut report = DispatchReport::new(event_type);

        if event_type == events::SENSOR_READING {
            if let Some(engine) = &self.rule_engine {
                // History and cooldowns follow the reading's own timestamp
                let breaches = engine
                    .write()
                    .await
                    .evaluate_thresholds_at(&event.data, event.time_fired);
                report.threshold_breaches = breaches.len();
                counters
                    .threshold_breaches
                    .fetch_add(breaches.len() as u64, Ordering::Relaxed);
                for breach in &breaches {
                    let data = breach_data(&event.data, breach);
                    report.merge(self.route(events::THRESHOLD_BREACH, &data).await);
                }
            }
        }

        report.merge(self.route(event_type, &event.data).await);
        report
    }

    /// Start executions for every active workflow trigger matching the event
    pub async fn dispatch(&self, event_type: &str, event_data: &Value) -> DispatchReport {
        bump(&self.shared.counters.events_processed);
        self.route(event_type, event_data).await
    }

    async fn route(&self, event_type: &str, event_data: &Value) -> DispatchReport {
        let counters = &self.shared.counters;
        let mut report = DispatchReport::new(event_type);

        let workflows = match self.shared.store.find_by_status(WorkflowStatus::Active).await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!(event_type, error = %e, "Failed to load active workflows");
                bump(&counters.dispatch_errors);
                report.errors += 1;
                return report;
            }
        };

        for workflow in workflows {
            let trigger_data: Vec<Value> = workflow
                .should_trigger(event_type, event_data)
                .into_iter()
                .map(|t| t.trigger_data(event_data))
                .collect();
            if trigger_data.is_empty() {
                continue;
            }

            report.workflows_matched += 1;
            let ceiling = workflow.ceiling(self.config.default_max_concurrent_executions);
            let workflow = Arc::new(workflow);

            for data in trigger_data {
                report.triggers_matched += 1;
                bump(&counters.triggers_matched);

                match self.start(workflow.clone(), data, Some(ceiling)).await {
                    Ok(execution) => report.started.push(execution.id),
                    Err(DispatchError::Tracker(TrackerError::CeilingReached {
                        in_flight,
                        ceiling,
                        ..
                    })) => {
                        warn!(
                            workflow_id = %workflow.id,
                            in_flight,
                            ceiling,
                            "Workflow exceeded concurrency limit, dropping trigger"
                        );
                        bump(&counters.dropped_ceiling);
                        report.dropped_ceiling += 1;
                    }
                    Err(DispatchError::Saturated) => {
                        warn!(workflow_id = %workflow.id, "Worker pool saturated, dropping trigger");
                        bump(&counters.dropped_saturated);
                        report.dropped_saturated += 1;
                    }
                    Err(e) => {
                        error!(workflow_id = %workflow.id, error = %e, "Failed to start workflow execution");
                        bump(&counters.dispatch_errors);
                        report.errors += 1;
                    }
                }
            }
        }

        info!(
            event_type,
            workflows = report.workflows_matched,
            started = report.started.len(),
            dropped = report.dropped_ceiling + report.dropped_saturated,
            "Triggered workflows for event"
        );
        report
    }

    /// Start a workflow by hand, bypassing trigger matching and the ceiling
    ///
    /// Returns the pending execution snapshot.
    pub async fn execute_manual(
        &self,
        workflow_id: &str,
        variables: Map<String, Value>,
        executed_by: &str,
    ) -> DispatchResult<Execution> {
        let workflow = self
            .shared
            .store
            .get(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;

        if !workflow.status.allows_manual_execution() {
            return Err(DispatchError::NotExecutable {
                workflow_id: workflow.id,
                status: workflow.status,
            });
        }

        let trigger_data = json!({
            "trigger_type": "manual",
            "executed_by": executed_by,
            "execution_time": Utc::now().to_rfc3339(),
            "variables": variables,
        });

        info!(workflow_id, executed_by, "Manual workflow execution requested");
        self.start(Arc::new(workflow), trigger_data, None).await
    }

    /// Admit and spawn one execution; `None` skips the ceiling check
    async fn start(
        &self,
        workflow: Arc<Workflow>,
        trigger_data: Value,
        ceiling: Option<usize>,
    ) -> DispatchResult<Execution> {
        let permit = self
            .workers
            .clone()
            .try_acquire_owned()
            .map_err(|_| DispatchError::Saturated)?;

        let execution = workflow.create_execution(trigger_data)?;
        let snapshot = execution.clone();

        match ceiling {
            Some(ceiling) => self.shared.tracker.try_admit(execution, ceiling).await?,
            None => self.shared.tracker.register(execution).await?,
        }
        bump(&self.shared.counters.executions_started);

        debug!(
            workflow_id = %workflow.id,
            execution_id = %snapshot.id,
            "Dispatching workflow execution"
        );

        let shared = self.shared.clone();
        let execution_id = snapshot.id.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_execution(&shared, &workflow, &execution_id).await;
        });

        Ok(snapshot)
    }

    pub async fn statistics(&self) -> DispatcherStatistics {
        let c = &self.shared.counters;
        DispatcherStatistics {
            events_processed: c.events_processed.load(Ordering::Relaxed),
            threshold_breaches: c.threshold_breaches.load(Ordering::Relaxed),
            triggers_matched: c.triggers_matched.load(Ordering::Relaxed),
            executions_started: c.executions_started.load(Ordering::Relaxed),
            executions_completed: c.executions_completed.load(Ordering::Relaxed),
            executions_failed: c.executions_failed.load(Ordering::Relaxed),
            executions_timed_out: c.executions_timed_out.load(Ordering::Relaxed),
            dropped_ceiling: c.dropped_ceiling.load(Ordering::Relaxed),
            dropped_saturated: c.dropped_saturated.load(Ordering::Relaxed),
            dispatch_errors: c.dispatch_errors.load(Ordering::Relaxed),
            in_flight: self.shared.tracker.len().await,
            available_workers: self.workers.available_permits(),
        }
    }

    /// Wait until no execution task holds a worker permit
    pub async fn wait_idle(&self) {
        let permits = u32::try_from(self.config.max_workers).unwrap_or(u32::MAX);
        if let Ok(all) = self.workers.acquire_many(permits).await {
            drop(all);
        }
    }
}

/// Run an admitted execution to a terminal state
async fn run_execution(shared: &Shared, workflow: &Workflow, execution_id: &str) {
    let running = match shared.tracker.mark_running(execution_id).await {
        Ok(execution) => execution,
        Err(e) => {
            error!(execution_id, error = %e, "Execution vanished before it started");
            return;
        }
    };

    let result = match shared.runner.execute(workflow, &running).await {
        Ok(result) => result,
        Err(e @ RunnerError::Timeout { .. }) => ExecutionResult::timed_out(e.to_string()),
        Err(e) => ExecutionResult::failed(e.to_string()),
    };

    let Some(finished) = shared.tracker.complete(execution_id, result).await else {
        return;
    };

    match finished.status {
        ExecutionStatus::Completed => bump(&shared.counters.executions_completed),
        ExecutionStatus::Failed => bump(&shared.counters.executions_failed),
        ExecutionStatus::Timeout => bump(&shared.counters.executions_timed_out),
        ExecutionStatus::Pending | ExecutionStatus::Running => {}
    }

    if let Err(e) = shared.store.record_execution(&workflow.id, &finished).await {
        error!(workflow_id = %workflow.id, error = %e, "Failed to record execution");
    }

    info!(
        workflow_id = %workflow.id,
        execution_id,
        status = %finished.status,
        execution_time_ms = finished.execution_time_ms,
        "Workflow execution completed"
    );

    // No receivers is fine
    let _ = shared.completions.send(finished);
}

/// Payload of a `threshold_breach` event derived from a sensor reading
fn breach_data(reading: &Value, breach: &EvaluationResult) -> Value {
    let mut data = match reading {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("reading".to_string(), other.clone());
            map
        }
    };
    data.insert("event_type".to_string(), Value::from(events::THRESHOLD_BREACH));
    data.insert("rule_id".to_string(), Value::from(breach.rule_id.clone()));
    data.insert("rule_name".to_string(), Value::from(breach.rule_name.clone()));
    data.insert("confidence".to_string(), Value::from(breach.confidence));
    data.insert("priority".to_string(), Value::from(breach.priority));
    Value::Object(data)
}
