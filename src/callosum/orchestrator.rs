//! The Internal-tract coordinator: plan, route, collect, synthesize.
//!
//! An [`Orchestrator`] owns a registry of agent consumers and a
//! [`ResultStore`]. A high-level request flows through the macro-loop:
//!
//! 1. The [`ExecutionPlanner`] turns the request into ordered actions.
//! 2. Each action becomes a [`Task`] routed through the corpus callosum to
//!    its target particle (all actions in flight concurrently).
//! 3. Results are collected from the id-keyed result store, each under its
//!    task's timeout.
//! 4. The [`ResultSynthesizer`] folds them into a [`PlanSynthesis`], which
//!    feeds the pattern learner and the MTF ranker.
//!
//! When constructed without a bus ([`Orchestrator::direct`]), the same task
//! contract is honored by invoking each agent's `process_message` in-process.
//! That degraded mode exists for bring-up and testing only.
//!
//! # Example
//!
//! ```rust,no_run
//! use callosum::orchestrator::Orchestrator;
//! use callosum::planner::OrchestratorRequest;
//! use callosum::{CorpusCallosum, TractType};
//! use std::sync::Arc;
//!
//! # async fn example(my_agent: Arc<dyn callosum::consumer::AgentConsumer>) {
//! let bridge = Arc::new(CorpusCallosum::new());
//! bridge.start().await.ok();
//!
//! let orchestrator = Orchestrator::new(Arc::clone(&bridge));
//! orchestrator
//!     .register_agent_consumer("file_writer", my_agent, TractType::External)
//!     .await
//!     .unwrap();
//!
//! let synthesis = orchestrator
//!     .process_request(&OrchestratorRequest::new(
//!         "create_file",
//!         serde_json::json!({ "file_path": "/tmp/out.txt", "content": "hi" }),
//!     ))
//!     .await
//!     .unwrap();
//! assert_eq!(synthesis.total_actions, 1);
//!
//! orchestrator.stop_all_agents().await;
//! # }
//! ```

use futures_util::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::callosum::bridge::CorpusCallosum;
use crate::callosum::config::ExecutionMode;
use crate::callosum::consumer::{AgentConfig, AgentConsumer, AgentRunner, AgentStats};
use crate::callosum::message::{Message, MessagePayload, MessagePriority, TractType};
use crate::callosum::mtf_ranker::MtfRanker;
use crate::callosum::pattern_learner::PatternLearner;
use crate::callosum::planner::{
    ExecutionPlan, ExecutionPlanner, OrchestratorRequest, PlannedAction, PlannerError,
};
use crate::callosum::synthesizer::{ActionRecord, PlanSynthesis, ResultSynthesizer};
use crate::callosum::task::{
    ExecutionResult, ResultHandle, ResultStore, Task, TaskEnvelope, TaskState,
};

/// Errors surfaced to orchestrator callers. Routing and execution failures
/// are *not* errors — they come back as structured [`ExecutionResult`]s.
#[derive(Debug)]
pub enum OrchestratorError {
    /// An agent with this id is already registered.
    RegistrationConflict(String),
    /// Planning failed (unknown request kind, missing parameter).
    Planning(PlannerError),
    /// A required runtime dependency is absent and strict mode is on.
    MissingDependency(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::RegistrationConflict(id) => {
                write!(f, "Agent with id '{}' already registered", id)
            }
            OrchestratorError::Planning(e) => write!(f, "Planning failed: {}", e),
            OrchestratorError::MissingDependency(what) => {
                write!(f, "Missing runtime dependency: {}", what)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<PlannerError> for OrchestratorError {
    fn from(e: PlannerError) -> Self {
        OrchestratorError::Planning(e)
    }
}

/// The Internal-tract coordinator.
pub struct Orchestrator {
    bridge: Option<Arc<CorpusCallosum>>,
    mode: ExecutionMode,
    results: Arc<ResultStore>,
    agents: StdMutex<HashMap<String, Arc<AgentRunner>>>,
    planner: ExecutionPlanner,
    synthesizer: ResultSynthesizer,
    pattern_learner: Option<StdMutex<PatternLearner>>,
    mtf_ranker: Option<StdMutex<MtfRanker>>,
    /// Ids for messages built in degraded mode (the bus is not around to
    /// issue real ones). Negative so they can never shadow routed ids.
    direct_message_ids: AtomicI64,
}

impl Orchestrator {
    /// An orchestrator executing through the reactive bus.
    pub fn new(bridge: Arc<CorpusCallosum>) -> Self {
        Self::build(Some(bridge), ExecutionMode::Reactive)
    }

    /// A degraded-mode orchestrator invoking agents in-process. For bring-up
    /// and testing only — the result contract is identical.
    pub fn direct() -> Self {
        Self::build(None, ExecutionMode::Direct)
    }

    /// Build an orchestrator according to `config.mode`.
    ///
    /// Reactive mode without a bus falls back to direct execution with a
    /// warning, or fails when `config.strict_dependencies` is set.
    pub fn from_config(
        config: &crate::callosum::config::CallosumConfig,
        bridge: Option<Arc<CorpusCallosum>>,
    ) -> Result<Self, OrchestratorError> {
        match (config.mode, bridge) {
            (ExecutionMode::Reactive, Some(bridge)) => Ok(Self::new(bridge)),
            (ExecutionMode::Reactive, None) => {
                if config.strict_dependencies {
                    return Err(OrchestratorError::MissingDependency(
                        "reactive mode requires a corpus callosum".to_string(),
                    ));
                }
                log::warn!("reactive mode requested without a bus; using direct fallback");
                Ok(Self::direct())
            }
            (ExecutionMode::Direct, _) => Ok(Self::direct()),
        }
    }

    fn build(bridge: Option<Arc<CorpusCallosum>>, mode: ExecutionMode) -> Self {
        Self {
            bridge,
            mode,
            results: ResultStore::new(),
            agents: StdMutex::new(HashMap::new()),
            planner: ExecutionPlanner::new(),
            synthesizer: ResultSynthesizer::new(),
            pattern_learner: None,
            mtf_ranker: None,
            direct_message_ids: AtomicI64::new(-2),
        }
    }

    /// Attach a pattern learner (builder pattern). Each synthesized plan is
    /// analyzed and its discoveries persisted.
    pub fn with_pattern_learner(mut self, learner: PatternLearner) -> Self {
        self.pattern_learner = Some(StdMutex::new(learner));
        self
    }

    /// Attach an MTF ranker (builder pattern). Each executed action records a
    /// particle invocation.
    pub fn with_mtf_ranker(mut self, ranker: MtfRanker) -> Self {
        self.mtf_ranker = Some(StdMutex::new(ranker));
        self
    }

    /// Execution mode this orchestrator was built with.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Handle through which consumers (or anything else) write results into
    /// this orchestrator's store.
    pub fn result_handle(&self) -> ResultHandle {
        ResultHandle::new(Arc::clone(&self.results))
    }

    /// The sole writer for completed/failed outcomes; safe to call from any
    /// agent-consumer task.
    pub fn store_task_result(&self, task_id: &str, result: ExecutionResult) {
        self.results.store_task_result(task_id, result);
    }

    /// Instantiate and start an [`AgentRunner`] for `consumer` on `tract`.
    ///
    /// Duplicate ids are rejected with
    /// [`OrchestratorError::RegistrationConflict`]; the existing agent is
    /// unaffected.
    pub async fn register_agent_consumer(
        &self,
        agent_id: &str,
        consumer: Arc<dyn AgentConsumer>,
        tract: TractType,
    ) -> Result<(), OrchestratorError> {
        let config = AgentConfig::new(agent_id, tract);
        let runner = {
            let mut agents = self.agents.lock().unwrap();
            if agents.contains_key(agent_id) {
                return Err(OrchestratorError::RegistrationConflict(agent_id.to_string()));
            }
            let runner = match (&self.bridge, self.mode) {
                (Some(bridge), ExecutionMode::Reactive) => {
                    AgentRunner::new(config, Arc::clone(bridge), consumer)
                }
                _ => AgentRunner::detached(config, consumer),
            };
            agents.insert(agent_id.to_string(), Arc::clone(&runner));
            runner
        };

        if self.mode == ExecutionMode::Reactive {
            runner.start().await;
        }
        Ok(())
    }

    /// Stop every registered agent and clear the registry.
    pub async fn stop_all_agents(&self) {
        let drained: Vec<Arc<AgentRunner>> = {
            let mut agents = self.agents.lock().unwrap();
            agents.drain().map(|(_, runner)| runner).collect()
        };
        for runner in drained {
            runner.stop().await;
        }
    }

    /// Stats for every registered agent.
    pub fn get_agent_stats(&self) -> Vec<AgentStats> {
        self.agents
            .lock()
            .unwrap()
            .values()
            .map(|runner| runner.get_stats())
            .collect()
    }

    fn lookup_agent(&self, agent_id: &str) -> Option<Arc<AgentRunner>> {
        self.agents.lock().unwrap().get(agent_id).cloned()
    }

    /// Execute one task end to end and return its result.
    ///
    /// Reactive mode routes a task envelope to the target agent's tract and
    /// awaits the result slot under the task's timeout; expiry produces a
    /// synthetic Timeout result and any later write for the id is discarded
    /// with a warning.
    pub async fn execute_task(&self, task: Task) -> ExecutionResult {
        match self.mode {
            ExecutionMode::Reactive => self.execute_task_reactive(task).await,
            ExecutionMode::Direct => self.execute_task_direct(task).await,
        }
    }

    async fn execute_task_reactive(&self, task: Task) -> ExecutionResult {
        let bridge = match &self.bridge {
            Some(bridge) => bridge,
            None => {
                return ExecutionResult::failed(
                    &task.id,
                    &task.agent,
                    "no corpus callosum attached",
                    0.0,
                )
            }
        };

        let dest_tract = self
            .lookup_agent(&task.agent)
            .map(|runner| runner.config().tract)
            .unwrap_or(TractType::External);
        let priority = MessagePriority::from_task_priority(task.priority);
        let timeout_secs = task.timeout_secs;
        let task_id = task.id.clone();
        let agent = task.agent.clone();
        let payload_size = serde_json::to_vec(&task.context).map(|b| b.len()).unwrap_or(0);

        // Register the slot before routing so an instant reply cannot race
        // the registration.
        let slot = self.results.register(&task_id);
        let envelope = TaskEnvelope::new(task, self.result_handle());

        let message_id = bridge
            .route_message(
                TractType::Internal,
                dest_tract,
                priority,
                MessagePayload::Task(envelope),
                payload_size,
            )
            .await;

        if message_id < 0 {
            self.results.abandon(&task_id);
            return ExecutionResult::failed(&task_id, &agent, "message routing failed", 0.0);
        }

        match tokio::time::timeout(Duration::from_secs_f64(timeout_secs), slot).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                ExecutionResult::failed(&task_id, &agent, "result slot closed unexpectedly", 0.0)
            }
            Err(_) => {
                self.results.abandon(&task_id);
                log::warn!("task {} timed out after {}s", task_id, timeout_secs);
                ExecutionResult::timed_out(&task_id, &agent, timeout_secs)
            }
        }
    }

    async fn execute_task_direct(&self, task: Task) -> ExecutionResult {
        let runner = match self.lookup_agent(&task.agent) {
            Some(runner) => runner,
            None => {
                return ExecutionResult::failed(
                    &task.id,
                    &task.agent,
                    format!("agent '{}' not registered", task.agent),
                    0.0,
                )
            }
        };

        let task_id = task.id.clone();
        let agent = task.agent.clone();
        let priority = MessagePriority::from_task_priority(task.priority);
        let payload_size = serde_json::to_vec(&task.context).map(|b| b.len()).unwrap_or(0);
        let message = Message {
            id: self.direct_message_ids.fetch_sub(1, Ordering::Relaxed),
            source_tract: TractType::Internal,
            dest_tract: runner.config().tract,
            priority,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            payload_size,
            payload: MessagePayload::Task(TaskEnvelope::new(task, self.result_handle())),
        };

        let start = Instant::now();
        match runner.process_direct(&message).await {
            Ok(output) => ExecutionResult::completed(
                &task_id,
                &agent,
                output,
                start.elapsed().as_secs_f64(),
            ),
            Err(e) => ExecutionResult::failed(
                &task_id,
                &agent,
                e.to_string(),
                start.elapsed().as_secs_f64(),
            ),
        }
    }

    /// The macro-loop: plan the request, execute every planned action, and
    /// synthesize the outcome. Pattern learning and MTF recording run on the
    /// synthesized result when attached.
    pub async fn process_request(
        &self,
        request: &OrchestratorRequest,
    ) -> Result<PlanSynthesis, OrchestratorError> {
        let plan = self.planner.plan(request)?;
        log::info!(
            "executing plan {} ({} actions) for request '{}'",
            plan.plan_id,
            plan.actions.len(),
            request.request_type
        );

        if let Some(learner) = &self.pattern_learner {
            let recommendations = learner
                .lock()
                .unwrap()
                .get_pattern_recommendations(&plan.action_sequence());
            for pattern in recommendations {
                log::info!(
                    "pattern recommendation for plan {}: {}",
                    plan.plan_id,
                    pattern.name
                );
            }
        }

        let results = self.execute_plan(&plan).await;

        let records: Vec<ActionRecord> = plan
            .actions
            .iter()
            .zip(results.iter())
            .map(|(action, result)| ActionRecord {
                action_type: action.action_type,
                status: result.status,
                output: result.output.clone(),
                error: result.error.clone(),
            })
            .collect();
        let synthesis = self.synthesizer.synthesize(&plan.plan_id, records);

        if let Some(learner) = &self.pattern_learner {
            learner.lock().unwrap().analyze_synthesis(&synthesis);
        }
        if let Some(ranker) = &self.mtf_ranker {
            let mut ranker = ranker.lock().unwrap();
            for (action, result) in plan.actions.iter().zip(results.iter()) {
                ranker.record_particle_invocation(
                    &action.target_particle,
                    result.execution_time_secs,
                    result.status == TaskState::Completed,
                );
            }
        }

        Ok(synthesis)
    }

    /// Execute every action of a plan concurrently, returning results in
    /// action order.
    async fn execute_plan(&self, plan: &ExecutionPlan) -> Vec<ExecutionResult> {
        let tasks: Vec<Task> = plan.actions.iter().map(|a| self.action_to_task(a)).collect();
        join_all(tasks.into_iter().map(|task| self.execute_task(task))).await
    }

    fn action_to_task(&self, action: &PlannedAction) -> Task {
        Task::new(&action.action_id, &action.target_particle, action.action_type.as_str())
            .with_description(format!("{} via {}", action.action_type, action.target_particle))
            .with_context(action.payload.clone())
            .with_priority(action.priority)
    }

    /// Planner statistics passthrough.
    pub fn planner_stats(&self) -> crate::callosum::planner::PlannerStats {
        self.planner.get_stats()
    }

    /// Syntheses performed so far.
    pub fn syntheses_performed(&self) -> u64 {
        self.synthesizer.syntheses_performed()
    }
}
