// src/lib.rs

// Import the top-level `callosum` module.
pub mod callosum;

// Re-export the component modules at the crate root so external code can use
// short paths like callosum::planner::OrchestratorRequest.
pub use crate::callosum::{
    bridge, circuit_breaker, config, consumer, event_store, id_generator, message, mtf_ranker,
    orchestrator, particle, pattern_learner, planner, stream, synthesis, synthesizer, task,
};

// Re-exporting key items for easier external access.
pub use crate::callosum::bridge::{CorpusCallosum, MessageFeed};
pub use crate::callosum::config::{CallosumConfig, ExecutionMode};
pub use crate::callosum::event_store::ConsciousnessMetrics;
pub use crate::callosum::message::{
    Message, MessagePayload, MessagePriority, MessageStats, TractType,
};
pub use crate::callosum::orchestrator::{Orchestrator, OrchestratorError};
pub use crate::callosum::task::{ExecutionResult, Task, TaskState};
