use async_trait::async_trait;
use callosum::consumer::AgentConsumer;
use callosum::orchestrator::{Orchestrator, OrchestratorError};
use callosum::planner::OrchestratorRequest;
use callosum::task::Task;
use callosum::{CorpusCallosum, Message, TaskState, TractType};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Returns a fixed JSON answer after a small simulated work delay.
struct AnswerAgent {
    response: Value,
    delay: Duration,
}

impl AnswerAgent {
    fn new(response: Value) -> Self {
        Self {
            response,
            delay: Duration::from_millis(5),
        }
    }

    fn slow(response: Value, delay: Duration) -> Self {
        Self { response, delay }
    }
}

#[async_trait]
impl AgentConsumer for AnswerAgent {
    async fn process_message(
        &self,
        _message: &Message,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.response.clone())
    }
}

/// Always fails with the configured error message.
struct FailingAgent {
    error: String,
}

#[async_trait]
impl AgentConsumer for FailingAgent {
    async fn process_message(
        &self,
        _message: &Message,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Err(self.error.clone().into())
    }
}

async fn reactive_orchestrator() -> (Arc<CorpusCallosum>, Orchestrator) {
    let bridge = Arc::new(CorpusCallosum::new());
    bridge.start().await.unwrap();
    let orchestrator = Orchestrator::new(Arc::clone(&bridge));
    (bridge, orchestrator)
}

#[tokio::test]
async fn task_round_trip_completes() {
    let (bridge, orchestrator) = reactive_orchestrator().await;
    orchestrator
        .register_agent_consumer(
            "answer-agent",
            Arc::new(AnswerAgent::new(serde_json::json!({ "ok": true, "n": 42 }))),
            TractType::Internal,
        )
        .await
        .unwrap();

    let task = Task::new("round-trip-1", "answer-agent", "answer").with_timeout_secs(5.0);
    let result = orchestrator.execute_task(task).await;

    assert_eq!(result.status, TaskState::Completed);
    let output = result.output.expect("completed result carries output");
    assert_eq!(output["n"], 42);
    assert!(result.execution_time_secs > 0.0);

    orchestrator.stop_all_agents().await;
    bridge.stop().await;
}

#[tokio::test]
async fn task_timeout_is_terminal_and_late_result_ignored() {
    let (bridge, orchestrator) = reactive_orchestrator().await;
    orchestrator
        .register_agent_consumer(
            "sleepy-agent",
            Arc::new(AnswerAgent::slow(
                serde_json::json!({ "late": true }),
                Duration::from_secs(2),
            )),
            TractType::Internal,
        )
        .await
        .unwrap();

    let task = Task::new("too-slow-1", "sleepy-agent", "nap").with_timeout_secs(0.5);
    let result = orchestrator.execute_task(task).await;

    assert_eq!(result.status, TaskState::Timeout);
    assert!(result.error.unwrap().contains("timeout"));

    // Let the agent finish and attempt its late store; it must be discarded
    // without disturbing anything.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let stats = orchestrator.get_agent_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].messages_processed, 1);

    orchestrator.stop_all_agents().await;
    bridge.stop().await;
}

#[tokio::test]
async fn processing_errors_surface_as_failed_results() {
    let (bridge, orchestrator) = reactive_orchestrator().await;
    orchestrator
        .register_agent_consumer(
            "broken-agent",
            Arc::new(FailingAgent {
                error: "disk exploded: sector 7".to_string(),
            }),
            TractType::External,
        )
        .await
        .unwrap();

    let task = Task::new("boom-1", "broken-agent", "explode").with_timeout_secs(5.0);
    let result = orchestrator.execute_task(task).await;

    assert_eq!(result.status, TaskState::Failed);
    assert!(result.error.unwrap().contains("disk exploded"));

    orchestrator.stop_all_agents().await;
    bridge.stop().await;
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let (bridge, orchestrator) = reactive_orchestrator().await;
    orchestrator
        .register_agent_consumer(
            "agent-1",
            Arc::new(AnswerAgent::new(serde_json::json!(1))),
            TractType::Internal,
        )
        .await
        .unwrap();

    let second = orchestrator
        .register_agent_consumer(
            "agent-1",
            Arc::new(AnswerAgent::new(serde_json::json!(2))),
            TractType::Internal,
        )
        .await;
    assert!(matches!(
        second,
        Err(OrchestratorError::RegistrationConflict(_))
    ));

    // The existing agent still answers.
    let result = orchestrator
        .execute_task(Task::new("t", "agent-1", "ask").with_timeout_secs(5.0))
        .await;
    assert_eq!(result.status, TaskState::Completed);
    assert_eq!(result.output.unwrap(), serde_json::json!(1));

    orchestrator.stop_all_agents().await;
    bridge.stop().await;
}

#[tokio::test]
async fn direct_mode_honors_the_same_result_contract() {
    let orchestrator = Orchestrator::direct();
    orchestrator
        .register_agent_consumer(
            "answer-agent",
            Arc::new(AnswerAgent::new(serde_json::json!({ "ok": true, "n": 42 }))),
            TractType::Internal,
        )
        .await
        .unwrap();

    let result = orchestrator
        .execute_task(Task::new("direct-1", "answer-agent", "answer").with_timeout_secs(5.0))
        .await;
    assert_eq!(result.status, TaskState::Completed);
    assert_eq!(result.output.unwrap()["n"], 42);

    let missing = orchestrator
        .execute_task(Task::new("direct-2", "nobody-home", "noop"))
        .await;
    assert_eq!(missing.status, TaskState::Failed);
    assert!(missing.error.unwrap().contains("not registered"));

    orchestrator.stop_all_agents().await;
}

#[tokio::test]
async fn macro_loop_plans_executes_and_synthesizes() {
    let orchestrator = Orchestrator::direct();
    // Particles for the create_component plan: a directory creator and a
    // file writer.
    orchestrator
        .register_agent_consumer(
            "directory_creator",
            Arc::new(AnswerAgent::new(serde_json::json!({ "created": true }))),
            TractType::External,
        )
        .await
        .unwrap();
    orchestrator
        .register_agent_consumer(
            "file_writer",
            Arc::new(AnswerAgent::new(serde_json::json!({ "bytes_written": 64 }))),
            TractType::External,
        )
        .await
        .unwrap();

    let synthesis = orchestrator
        .process_request(&OrchestratorRequest::new(
            "create_component",
            serde_json::json!({ "component_name": "auth", "base_path": "/tmp/components" }),
        ))
        .await
        .unwrap();

    assert!(synthesis.success);
    assert_eq!(synthesis.total_actions, 3);
    assert_eq!(synthesis.completed_actions, 3);
    assert_eq!(synthesis.failed_actions, 0);
    assert_eq!(orchestrator.planner_stats().plans_generated, 1);
    assert_eq!(orchestrator.syntheses_performed(), 1);

    orchestrator.stop_all_agents().await;
}

#[tokio::test]
async fn macro_loop_feeds_learner_and_ranker() {
    use callosum::mtf_ranker::{MtfRanker, DEFAULT_RE_RANKING_INTERVAL};
    use callosum::pattern_learner::PatternLearner;

    let orchestrator = Orchestrator::direct()
        .with_pattern_learner(PatternLearner::new(None))
        .with_mtf_ranker(MtfRanker::new(None, None, DEFAULT_RE_RANKING_INTERVAL));

    orchestrator
        .register_agent_consumer(
            "directory_creator",
            Arc::new(AnswerAgent::new(serde_json::json!({ "created": true }))),
            TractType::External,
        )
        .await
        .unwrap();
    orchestrator
        .register_agent_consumer(
            "file_writer",
            Arc::new(AnswerAgent::new(serde_json::json!({ "bytes_written": 10 }))),
            TractType::External,
        )
        .await
        .unwrap();

    let synthesis = orchestrator
        .process_request(&OrchestratorRequest::new(
            "create_component",
            serde_json::json!({ "component_name": "billing" }),
        ))
        .await
        .unwrap();
    assert!(synthesis.success);

    orchestrator.stop_all_agents().await;
}

#[tokio::test]
async fn from_config_falls_back_or_fails_strictly() {
    use callosum::{CallosumConfig, ExecutionMode};

    let lenient = CallosumConfig {
        mode: ExecutionMode::Reactive,
        ..Default::default()
    };
    let orchestrator = Orchestrator::from_config(&lenient, None).unwrap();
    assert_eq!(orchestrator.mode(), ExecutionMode::Direct);

    let strict = CallosumConfig {
        mode: ExecutionMode::Reactive,
        strict_dependencies: true,
        ..Default::default()
    };
    assert!(matches!(
        Orchestrator::from_config(&strict, None),
        Err(OrchestratorError::MissingDependency(_))
    ));
}

#[tokio::test]
async fn unknown_request_kind_fails_planning() {
    let orchestrator = Orchestrator::direct();
    let outcome = orchestrator
        .process_request(&OrchestratorRequest::new(
            "summon_demon",
            serde_json::json!({}),
        ))
        .await;
    assert!(matches!(outcome, Err(OrchestratorError::Planning(_))));
}
