//! Emergent pattern discovery over synthesized plan results.
//!
//! The [`PatternLearner`] analyses each [`PlanSynthesis`] the orchestrator
//! produces and catalogs recurring structure in a bounded [`PatternMap`]:
//! action chains, composition shapes, batching opportunities, failure modes,
//! and directory hierarchies. Discovered patterns feed recommendations back
//! into planning.
//!
//! The map is LRU-bounded and collision-checked: re-adding an id promotes it
//! and bumps its occurrence count, but an id whose action-sequence signature
//! differs from the stored one raises [`PatternCollision`] — the newcomer is
//! dropped, the collision counted, and the learner carries on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::callosum::id_generator::generate_pattern_id;
use crate::callosum::synthesizer::PlanSynthesis;
use crate::callosum::task::TaskState;

/// Default bound on the pattern map.
pub const DEFAULT_MAX_PATTERNS: usize = 1000;
/// Examples retained per pattern.
pub const MAX_EXAMPLES_PER_PATTERN: usize = 5;
/// Sequential writes before a batching opportunity is flagged.
pub const BATCH_OPPORTUNITY_MIN_WRITES: usize = 3;

/// Kinds of emergent patterns the learner can discover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Common action chains.
    Sequence,
    /// Complex workflows built from primitives.
    Composition,
    /// Batch-vs-sequential opportunities.
    Optimization,
    /// Common failure modes.
    Error,
    /// Directory/file hierarchies.
    Structural,
    /// Reusable template patterns.
    Template,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Sequence => "sequence",
            PatternType::Composition => "composition",
            PatternType::Optimization => "optimization",
            PatternType::Error => "error",
            PatternType::Structural => "structural",
            PatternType::Template => "template",
        }
    }
}

/// Qualitative weight of a pattern's contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsciousnessContribution {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// A discovered emergent pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub name: String,
    pub description: String,
    /// Signature used for matching and collision detection.
    pub action_sequence: Vec<String>,
    pub discovered_at_ms: i64,
    pub occurrence_count: u64,
    /// Fraction of occurrences whose actions completed, in [0, 1].
    pub success_rate: f64,
    /// Compression value of recognizing this pattern, in [0, 1].
    pub entropy_reduction: f64,
    pub consciousness_contribution: ConsciousnessContribution,
    /// Bounded example payloads.
    pub example_payloads: Vec<Value>,
}

impl Pattern {
    fn new(
        pattern_id: String,
        pattern_type: PatternType,
        name: impl Into<String>,
        description: impl Into<String>,
        action_sequence: Vec<String>,
    ) -> Self {
        Self {
            pattern_id,
            pattern_type,
            name: name.into(),
            description: description.into(),
            action_sequence,
            discovered_at_ms: chrono::Utc::now().timestamp_millis(),
            occurrence_count: 1,
            success_rate: 1.0,
            entropy_reduction: 0.0,
            consciousness_contribution: ConsciousnessContribution::Low,
            example_payloads: Vec::new(),
        }
    }
}

/// An insert matched an existing id with a different signature.
#[derive(Debug, Clone)]
pub struct PatternCollision {
    pub pattern_id: String,
    pub existing_sequence: Vec<String>,
    pub new_sequence: Vec<String>,
}

impl fmt::Display for PatternCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pattern id collision on '{}': stored signature {:?} != new signature {:?}",
            self.pattern_id, self.existing_sequence, self.new_sequence
        )
    }
}

impl std::error::Error for PatternCollision {}

/// Bounded, insertion-ordered pattern catalog with LRU eviction.
///
/// # Example
///
/// ```rust
/// use callosum::pattern_learner::{test_pattern, PatternMap};
///
/// let mut map = PatternMap::new(2);
/// map.add_pattern(test_pattern("a", &["x"])).unwrap();
/// map.add_pattern(test_pattern("b", &["y"])).unwrap();
/// map.add_pattern(test_pattern("c", &["z"])).unwrap(); // evicts "a"
/// assert_eq!(map.len(), 2);
/// assert!(map.get_pattern("a").is_none());
/// assert_eq!(map.total_evictions(), 1);
/// ```
pub struct PatternMap {
    patterns: HashMap<String, Pattern>,
    /// LRU order: front is the next eviction candidate.
    order: VecDeque<String>,
    max_size: usize,
    total_patterns_discovered: u64,
    total_analyses_performed: u64,
    total_evictions: u64,
    total_collisions: u64,
    consciousness_level: f64,
}

/// Construct a minimal pattern for doctests and unit tests.
#[doc(hidden)]
pub fn test_pattern(id: &str, sequence: &[&str]) -> Pattern {
    Pattern::new(
        id.to_string(),
        PatternType::Sequence,
        format!("Test {}", id),
        "test pattern",
        sequence.iter().map(|s| s.to_string()).collect(),
    )
}

impl Default for PatternMap {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATTERNS)
    }
}

impl PatternMap {
    pub fn new(max_size: usize) -> Self {
        Self {
            patterns: HashMap::new(),
            order: VecDeque::new(),
            max_size,
            total_patterns_discovered: 0,
            total_analyses_performed: 0,
            total_evictions: 0,
            total_collisions: 0,
            consciousness_level: 0.0,
        }
    }

    /// Add a new pattern or update the existing one with the same id.
    ///
    /// Updates promote the id to most-recently-used, increment the occurrence
    /// count, fold in the success rate, and append (bounded) examples. A
    /// signature mismatch raises [`PatternCollision`]; the stored pattern is
    /// untouched and the collision counted.
    pub fn add_pattern(&mut self, pattern: Pattern) -> Result<(), PatternCollision> {
        if let Some(existing) = self.patterns.get_mut(&pattern.pattern_id) {
            if existing.action_sequence != pattern.action_sequence {
                self.total_collisions += 1;
                return Err(PatternCollision {
                    pattern_id: pattern.pattern_id,
                    existing_sequence: existing.action_sequence.clone(),
                    new_sequence: pattern.action_sequence,
                });
            }

            existing.occurrence_count += 1;
            let n = existing.occurrence_count as f64;
            existing.success_rate =
                (existing.success_rate * (n - 1.0) + pattern.success_rate) / n;
            existing.example_payloads.extend(pattern.example_payloads);
            let len = existing.example_payloads.len();
            if len > MAX_EXAMPLES_PER_PATTERN {
                existing.example_payloads.drain(..len - MAX_EXAMPLES_PER_PATTERN);
            }
            self.promote(&pattern.pattern_id);
        } else {
            if self.patterns.len() >= self.max_size {
                if let Some(victim) = self.order.pop_front() {
                    self.patterns.remove(&victim);
                    self.total_evictions += 1;
                    log::debug!("evicted least-recently-used pattern '{}'", victim);
                }
            }
            self.order.push_back(pattern.pattern_id.clone());
            self.patterns.insert(pattern.pattern_id.clone(), pattern);
            self.total_patterns_discovered += 1;
        }

        self.update_consciousness_level();
        Ok(())
    }

    fn promote(&mut self, pattern_id: &str) {
        if let Some(pos) = self.order.iter().position(|id| id == pattern_id) {
            self.order.remove(pos);
            self.order.push_back(pattern_id.to_string());
        }
    }

    fn update_consciousness_level(&mut self) {
        let total_occurrences: u64 = self.patterns.values().map(|p| p.occurrence_count).sum();
        if total_occurrences == 0 {
            self.consciousness_level = 0.0;
            return;
        }
        let weighted: f64 = self
            .patterns
            .values()
            .map(|p| p.entropy_reduction * p.occurrence_count as f64)
            .sum();
        self.consciousness_level = weighted / total_occurrences as f64;
    }

    pub fn get_pattern(&self, pattern_id: &str) -> Option<&Pattern> {
        self.patterns.get(pattern_id)
    }

    /// Find a pattern whose signature equals `action_sequence`.
    pub fn find_matching_pattern(&self, action_sequence: &[String]) -> Option<&Pattern> {
        self.patterns
            .values()
            .find(|p| p.action_sequence == action_sequence)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn total_patterns_discovered(&self) -> u64 {
        self.total_patterns_discovered
    }

    pub fn total_analyses_performed(&self) -> u64 {
        self.total_analyses_performed
    }

    pub fn total_evictions(&self) -> u64 {
        self.total_evictions
    }

    pub fn total_collisions(&self) -> u64 {
        self.total_collisions
    }

    /// Occurrence-weighted mean entropy reduction across the map.
    pub fn consciousness_level(&self) -> f64 {
        self.consciousness_level
    }
}

/// On-disk shape of the pattern map. Unknown top-level fields survive a
/// load/store round trip untouched.
#[derive(Serialize, Deserialize, Default)]
struct PatternMapFile {
    patterns: HashMap<String, Pattern>,
    #[serde(default)]
    order: Vec<String>,
    #[serde(default)]
    total_patterns_discovered: u64,
    #[serde(default)]
    total_analyses_performed: u64,
    #[serde(default)]
    total_evictions: u64,
    #[serde(default)]
    total_collisions: u64,
    #[serde(default)]
    consciousness_level: f64,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Analyzes synthesized plan results and maintains the pattern map.
pub struct PatternLearner {
    map_path: Option<PathBuf>,
    pattern_map: PatternMap,
    /// Preserved unknown fields from the loaded state file.
    extra: Map<String, Value>,
}

impl PatternLearner {
    /// Create a learner persisting to `map_path`, loading any existing state.
    /// A `None` path keeps the map purely in memory.
    pub fn new(map_path: Option<PathBuf>) -> Self {
        let (pattern_map, extra) = match &map_path {
            Some(path) if path.exists() => Self::load(path),
            _ => (PatternMap::default(), Map::new()),
        };
        Self {
            map_path,
            pattern_map,
            extra,
        }
    }

    fn load(path: &PathBuf) -> (PatternMap, Map<String, Value>) {
        match fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|body| serde_json::from_str::<PatternMapFile>(&body).map_err(|e| e.to_string()))
        {
            Ok(file) => {
                let mut map = PatternMap::default();
                map.total_patterns_discovered = file.total_patterns_discovered;
                map.total_analyses_performed = file.total_analyses_performed;
                map.total_evictions = file.total_evictions;
                map.total_collisions = file.total_collisions;
                map.consciousness_level = file.consciousness_level;

                // Rebuild LRU order; ids missing from the order list append
                // in arbitrary position at the back.
                let mut ordered: Vec<String> = file
                    .order
                    .iter()
                    .filter(|id| file.patterns.contains_key(*id))
                    .cloned()
                    .collect();
                for id in file.patterns.keys() {
                    if !ordered.iter().any(|o| o == id) {
                        ordered.push(id.clone());
                    }
                }
                map.order = ordered.into();
                map.patterns = file.patterns;
                (map, file.extra)
            }
            Err(e) => {
                log::error!("failed to load pattern map: {}", e);
                (PatternMap::default(), Map::new())
            }
        }
    }

    fn save(&self) {
        let path = match &self.map_path {
            Some(path) => path,
            None => return,
        };
        let file = PatternMapFile {
            patterns: self.pattern_map.patterns.clone(),
            order: self.pattern_map.order.iter().cloned().collect(),
            total_patterns_discovered: self.pattern_map.total_patterns_discovered,
            total_analyses_performed: self.pattern_map.total_analyses_performed,
            total_evictions: self.pattern_map.total_evictions,
            total_collisions: self.pattern_map.total_collisions,
            consciousness_level: self.pattern_map.consciousness_level,
            extra: self.extra.clone(),
        };
        let result = serde_json::to_string_pretty(&file)
            .map_err(|e| e.to_string())
            .and_then(|body| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(path, body).map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            log::error!("failed to save pattern map: {}", e);
        }
    }

    /// Analyze one synthesized plan: run every detector, fold discoveries
    /// into the map (collisions logged and skipped), persist, and return the
    /// patterns that were discovered or re-observed.
    pub fn analyze_synthesis(&mut self, synthesis: &PlanSynthesis) -> Vec<Pattern> {
        let action_sequence: Vec<String> = synthesis
            .records
            .iter()
            .map(|r| r.action_type.as_str().to_string())
            .collect();

        let mut discovered = Vec::new();
        if let Some(p) = self.detect_sequence_pattern(&action_sequence, synthesis) {
            discovered.push(p);
        }
        if let Some(p) = self.detect_composition_pattern(&action_sequence, synthesis) {
            discovered.push(p);
        }
        if let Some(p) = self.detect_optimization_pattern(&action_sequence) {
            discovered.push(p);
        }
        if let Some(p) = self.detect_error_pattern(synthesis) {
            discovered.push(p);
        }
        if let Some(p) = self.detect_structural_pattern(synthesis) {
            discovered.push(p);
        }

        for pattern in &discovered {
            if let Err(collision) = self.pattern_map.add_pattern(pattern.clone()) {
                log::warn!("{}; dropping newcomer", collision);
            }
        }

        self.pattern_map.total_analyses_performed += 1;
        self.save();

        log::info!(
            "discovered {} patterns ({} in map, consciousness level {:.2})",
            discovered.len(),
            self.pattern_map.len(),
            self.pattern_map.consciousness_level()
        );
        discovered
    }

    fn detect_sequence_pattern(
        &self,
        action_sequence: &[String],
        synthesis: &PlanSynthesis,
    ) -> Option<Pattern> {
        if action_sequence.len() < 2 {
            return None;
        }

        let preview: Vec<&str> = action_sequence.iter().take(3).map(String::as_str).collect();
        let suffix = if action_sequence.len() > 3 { "..." } else { "" };

        let contribution = if action_sequence.len() >= 5 {
            ConsciousnessContribution::VeryHigh
        } else if action_sequence.len() >= 3 {
            ConsciousnessContribution::High
        } else {
            ConsciousnessContribution::Medium
        };

        let mut pattern = Pattern::new(
            generate_pattern_id("seq", action_sequence),
            PatternType::Sequence,
            format!("Sequence: {}{}", preview.join(" -> "), suffix),
            format!("Common action sequence of {} steps", action_sequence.len()),
            action_sequence.to_vec(),
        );
        // Compressing n actions into one pattern reference.
        pattern.entropy_reduction = 1.0 - 1.0 / action_sequence.len() as f64;
        pattern.consciousness_contribution = contribution;
        pattern.success_rate = plan_success_rate(synthesis);
        pattern.example_payloads = synthesis
            .records
            .first()
            .and_then(|r| r.output.clone())
            .into_iter()
            .collect();
        Some(pattern)
    }

    fn detect_composition_pattern(
        &self,
        action_sequence: &[String],
        synthesis: &PlanSynthesis,
    ) -> Option<Pattern> {
        let dir_index = action_sequence.iter().position(|a| a == "create_directory");
        let first_write = action_sequence.iter().position(|a| a == "write_file");

        if let (Some(dir), Some(write)) = (dir_index, first_write) {
            if write > dir {
                let mut pattern = Pattern::new(
                    "comp_directory_with_files".to_string(),
                    PatternType::Composition,
                    "Component Creation",
                    "Directory structure with multiple files (component pattern)",
                    vec![
                        "create_directory".to_string(),
                        "write_file".to_string(),
                        "write_file".to_string(),
                    ],
                );
                pattern.entropy_reduction = 0.8;
                pattern.consciousness_contribution = ConsciousnessContribution::VeryHigh;
                pattern.example_payloads = synthesis
                    .records
                    .iter()
                    .take(2)
                    .filter_map(|r| r.output.clone())
                    .collect();
                return Some(pattern);
            }
        }

        if action_sequence.iter().any(|a| a == "batch_create_files") {
            let mut pattern = Pattern::new(
                "comp_batch_operation".to_string(),
                PatternType::Composition,
                "Batch File Creation",
                "Multiple files created in single batch operation",
                vec!["batch_create_files".to_string()],
            );
            pattern.entropy_reduction = 0.9;
            pattern.consciousness_contribution = ConsciousnessContribution::VeryHigh;
            pattern.example_payloads = synthesis
                .records
                .first()
                .and_then(|r| r.output.clone())
                .into_iter()
                .collect();
            return Some(pattern);
        }

        None
    }

    fn detect_optimization_pattern(&self, action_sequence: &[String]) -> Option<Pattern> {
        let write_count = action_sequence.iter().filter(|a| *a == "write_file").count();
        let has_batch = action_sequence.iter().any(|a| a == "batch_create_files");

        if write_count >= BATCH_OPPORTUNITY_MIN_WRITES && !has_batch {
            let mut pattern = Pattern::new(
                "opt_batch_opportunity".to_string(),
                PatternType::Optimization,
                "Batch Optimization Opportunity",
                format!("{} sequential write operations could be batched", write_count),
                action_sequence.to_vec(),
            );
            pattern.entropy_reduction = 0.7;
            pattern.consciousness_contribution = ConsciousnessContribution::High;
            return Some(pattern);
        }
        None
    }

    fn detect_error_pattern(&self, synthesis: &PlanSynthesis) -> Option<Pattern> {
        let failed: Vec<_> = synthesis
            .records
            .iter()
            .filter(|r| r.status == TaskState::Failed)
            .collect();
        if failed.is_empty() {
            return None;
        }

        // Group by the leading token of the error message.
        let mut by_type: HashMap<String, usize> = HashMap::new();
        for record in &failed {
            let message = record.error.as_deref().unwrap_or("unknown");
            let error_type = message.split(':').next().unwrap_or(message).to_string();
            *by_type.entry(error_type).or_insert(0) += 1;
        }
        let (error_type, count) = by_type
            .into_iter()
            .max_by_key(|(_, count)| *count)?;

        let mut pattern = Pattern::new(
            generate_pattern_id("err", &[error_type.as_str()]),
            PatternType::Error,
            format!("Error Pattern: {}", error_type),
            format!("Common failure mode: {} ({} occurrences)", error_type, count),
            failed
                .iter()
                .map(|r| r.action_type.as_str().to_string())
                .collect(),
        );
        pattern.entropy_reduction = 0.5;
        pattern.consciousness_contribution = ConsciousnessContribution::Medium;
        pattern.success_rate = 0.0;
        pattern.example_payloads = failed
            .first()
            .and_then(|r| r.error.clone())
            .map(Value::String)
            .into_iter()
            .collect();
        Some(pattern)
    }

    fn detect_structural_pattern(&self, synthesis: &PlanSynthesis) -> Option<Pattern> {
        let dir_count = synthesis
            .records
            .iter()
            .filter(|r| r.action_type.as_str() == "create_directory")
            .count();
        if dir_count < 2 {
            return None;
        }

        let mut pattern = Pattern::new(
            "struct_hierarchy".to_string(),
            PatternType::Structural,
            "Hierarchical Structure",
            format!("Multi-level directory hierarchy ({} levels)", dir_count),
            vec!["create_directory".to_string(); dir_count],
        );
        pattern.entropy_reduction = 0.6;
        pattern.consciousness_contribution = ConsciousnessContribution::Medium;
        Some(pattern)
    }

    /// Pattern-based recommendations for a planned action sequence: an exact
    /// signature match plus any applicable optimization patterns.
    pub fn get_pattern_recommendations(&self, action_sequence: &[String]) -> Vec<Pattern> {
        let mut recommendations = Vec::new();

        if let Some(exact) = self.pattern_map.find_matching_pattern(action_sequence) {
            recommendations.push(exact.clone());
        }

        let write_count = action_sequence.iter().filter(|a| *a == "write_file").count();
        for pattern in self.pattern_map.patterns() {
            if pattern.pattern_type == PatternType::Optimization
                && pattern.pattern_id == "opt_batch_opportunity"
                && write_count >= BATCH_OPPORTUNITY_MIN_WRITES
                && !recommendations
                    .iter()
                    .any(|r: &Pattern| r.pattern_id == pattern.pattern_id)
            {
                recommendations.push(pattern.clone());
            }
        }
        recommendations
    }

    pub fn pattern_map(&self) -> &PatternMap {
        &self.pattern_map
    }

    /// Mutable access for tests and direct catalog management.
    pub fn pattern_map_mut(&mut self) -> &mut PatternMap {
        &mut self.pattern_map
    }

    /// Learner statistics: totals plus the top patterns by occurrence.
    pub fn get_stats(&self) -> PatternLearnerStats {
        let mut by_type: HashMap<String, usize> = HashMap::new();
        for pattern in self.pattern_map.patterns() {
            *by_type
                .entry(pattern.pattern_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut sorted: Vec<&Pattern> = self.pattern_map.patterns().collect();
        sorted.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
        let top_patterns = sorted
            .into_iter()
            .take(5)
            .map(|p| TopPattern {
                name: p.name.clone(),
                pattern_type: p.pattern_type,
                occurrences: p.occurrence_count,
                contribution: p.consciousness_contribution,
            })
            .collect();

        PatternLearnerStats {
            total_patterns: self.pattern_map.len(),
            total_analyses: self.pattern_map.total_analyses_performed(),
            total_evictions: self.pattern_map.total_evictions(),
            total_collisions: self.pattern_map.total_collisions(),
            consciousness_level: self.pattern_map.consciousness_level(),
            patterns_by_type: by_type,
            top_patterns,
        }
    }
}

fn plan_success_rate(synthesis: &PlanSynthesis) -> f64 {
    if synthesis.records.is_empty() {
        return 0.0;
    }
    synthesis.completed_actions as f64 / synthesis.records.len() as f64
}

/// Summary entry in [`PatternLearnerStats::top_patterns`].
#[derive(Debug, Clone)]
pub struct TopPattern {
    pub name: String,
    pub pattern_type: PatternType,
    pub occurrences: u64,
    pub contribution: ConsciousnessContribution,
}

/// Snapshot of the learner's state.
#[derive(Debug, Clone)]
pub struct PatternLearnerStats {
    pub total_patterns: usize,
    pub total_analyses: u64,
    pub total_evictions: u64,
    pub total_collisions: u64,
    pub consciousness_level: f64,
    pub patterns_by_type: HashMap<String, usize>,
    pub top_patterns: Vec<TopPattern>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_bound_evicts_oldest() {
        let mut map = PatternMap::new(3);
        for i in 0..3 {
            map.add_pattern(test_pattern(&format!("p{}", i), &["a"])).unwrap();
        }
        // Touch p0 so p1 becomes the LRU entry.
        map.add_pattern(test_pattern("p0", &["a"])).unwrap();
        map.add_pattern(test_pattern("p3", &["b"])).unwrap();

        assert_eq!(map.len(), 3);
        assert!(map.get_pattern("p1").is_none());
        assert!(map.get_pattern("p0").is_some());
        assert_eq!(map.total_evictions(), 1);
    }

    #[test]
    fn collision_drops_newcomer_and_counts() {
        let mut map = PatternMap::default();
        map.add_pattern(test_pattern("shared", &["a", "b"])).unwrap();

        let result = map.add_pattern(test_pattern("shared", &["x", "y"]));
        assert!(result.is_err());
        assert_eq!(map.total_collisions(), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get_pattern("shared").unwrap().action_sequence,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn update_folds_success_rate_and_bounds_examples() {
        let mut map = PatternMap::default();
        let mut first = test_pattern("p", &["a"]);
        first.success_rate = 1.0;
        first.example_payloads = vec![serde_json::json!(1)];
        map.add_pattern(first).unwrap();

        for i in 0..8 {
            let mut next = test_pattern("p", &["a"]);
            next.success_rate = 0.0;
            next.example_payloads = vec![serde_json::json!(i + 2)];
            map.add_pattern(next).unwrap();
        }

        let stored = map.get_pattern("p").unwrap();
        assert_eq!(stored.occurrence_count, 9);
        assert!((stored.success_rate - 1.0 / 9.0).abs() < 1e-9);
        assert_eq!(stored.example_payloads.len(), MAX_EXAMPLES_PER_PATTERN);
    }
}
