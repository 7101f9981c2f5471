//! Plan-level result synthesis.
//!
//! After the orchestrator has collected one [`ExecutionResult`] per planned
//! action, the [`ResultSynthesizer`] folds them into a [`PlanSynthesis`]:
//! completion counts, an overall success verdict, and a short list of coarse
//! emergent patterns observed in the result set.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::callosum::planner::ActionType;
use crate::callosum::task::TaskState;

/// Projection of one executed action used for synthesis and pattern learning.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub action_type: ActionType,
    pub status: TaskState,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// A coarse pattern observed in a plan's results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergentStructure {
    /// Pattern discriminator, e.g. `"batch_optimization"`.
    pub pattern: String,
    pub description: String,
    /// Pattern-specific detail (efficiency note, hierarchy depth, ...).
    pub detail: String,
}

/// Aggregated outcome of a full plan execution.
#[derive(Debug, Clone)]
pub struct PlanSynthesis {
    pub plan_id: String,
    /// True iff nothing failed and nothing timed out.
    pub success: bool,
    pub total_actions: usize,
    pub completed_actions: usize,
    pub timeout_actions: usize,
    pub failed_actions: usize,
    pub records: Vec<ActionRecord>,
    pub emergent_patterns: Vec<EmergentStructure>,
}

/// Folds per-action results into a plan-level outcome.
pub struct ResultSynthesizer {
    syntheses_performed: AtomicU64,
}

impl Default for ResultSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSynthesizer {
    pub fn new() -> Self {
        Self {
            syntheses_performed: AtomicU64::new(0),
        }
    }

    /// Synthesize the records of one executed plan.
    pub fn synthesize(&self, plan_id: &str, records: Vec<ActionRecord>) -> PlanSynthesis {
        let total_actions = records.len();
        let completed_actions = records
            .iter()
            .filter(|r| r.status == TaskState::Completed)
            .count();
        let timeout_actions = records
            .iter()
            .filter(|r| r.status == TaskState::Timeout)
            .count();
        let failed_actions = records
            .iter()
            .filter(|r| r.status == TaskState::Failed)
            .count();

        let mut emergent_patterns = Vec::new();
        if completed_actions > 0 {
            let batch_count = records
                .iter()
                .filter(|r| r.action_type == ActionType::BatchCreateFiles)
                .count();
            if batch_count > 0 {
                emergent_patterns.push(EmergentStructure {
                    pattern: "batch_optimization".to_string(),
                    description: "Multiple file operations compressed into single batch"
                        .to_string(),
                    detail: "O(n) -> O(1) for n files".to_string(),
                });
            }

            let template_count = records
                .iter()
                .filter(|r| r.action_type == ActionType::ApplyTemplate)
                .count();
            if template_count > 0 {
                emergent_patterns.push(EmergentStructure {
                    pattern: "template_abstraction".to_string(),
                    description: "Reusable patterns applied via templates".to_string(),
                    detail: "abstraction level: high".to_string(),
                });
            }

            // A single directory is routine; hierarchy starts at two.
            let dir_count = records
                .iter()
                .filter(|r| r.action_type == ActionType::CreateDirectory)
                .count();
            if dir_count >= 2 {
                emergent_patterns.push(EmergentStructure {
                    pattern: "structural_hierarchy".to_string(),
                    description: "Organized directory structure created".to_string(),
                    detail: format!("depth: {}", dir_count),
                });
            }
        }

        self.syntheses_performed.fetch_add(1, Ordering::Relaxed);

        PlanSynthesis {
            plan_id: plan_id.to_string(),
            success: failed_actions == 0 && timeout_actions == 0,
            total_actions,
            completed_actions,
            timeout_actions,
            failed_actions,
            records,
            emergent_patterns,
        }
    }

    /// Syntheses performed so far.
    pub fn syntheses_performed(&self) -> u64 {
        self.syntheses_performed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(action_type: ActionType) -> ActionRecord {
        ActionRecord {
            action_type,
            status: TaskState::Completed,
            output: Some(serde_json::json!({})),
            error: None,
        }
    }

    #[test]
    fn success_requires_no_failures_and_no_timeouts() {
        let synth = ResultSynthesizer::new();
        let mixed = synth.synthesize(
            "plan_x",
            vec![
                completed(ActionType::WriteFile),
                ActionRecord {
                    action_type: ActionType::WriteFile,
                    status: TaskState::Timeout,
                    output: None,
                    error: Some("timeout after 5s awaiting result".to_string()),
                },
            ],
        );
        assert!(!mixed.success);
        assert_eq!(mixed.completed_actions, 1);
        assert_eq!(mixed.timeout_actions, 1);
        assert_eq!(mixed.failed_actions, 0);
    }

    #[test]
    fn structural_hierarchy_needs_two_directories() {
        let synth = ResultSynthesizer::new();

        let single = synth.synthesize("p1", vec![completed(ActionType::CreateDirectory)]);
        assert!(single
            .emergent_patterns
            .iter()
            .all(|p| p.pattern != "structural_hierarchy"));

        let double = synth.synthesize(
            "p2",
            vec![
                completed(ActionType::CreateDirectory),
                completed(ActionType::CreateDirectory),
            ],
        );
        assert!(double
            .emergent_patterns
            .iter()
            .any(|p| p.pattern == "structural_hierarchy"));
    }

    #[test]
    fn batch_and_template_patterns_detected() {
        let synth = ResultSynthesizer::new();
        let synthesis = synth.synthesize(
            "p3",
            vec![
                completed(ActionType::BatchCreateFiles),
                completed(ActionType::ApplyTemplate),
            ],
        );
        let names: Vec<&str> = synthesis
            .emergent_patterns
            .iter()
            .map(|p| p.pattern.as_str())
            .collect();
        assert!(names.contains(&"batch_optimization"));
        assert!(names.contains(&"template_abstraction"));
        assert_eq!(synth.syntheses_performed(), 1);
    }
}
