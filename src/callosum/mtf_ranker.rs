//! Move-To-Front dynamic re-ranking of particle priorities.
//!
//! Every particle invocation is recorded with its wall time and outcome. On a
//! fixed interval the ranker re-sorts all tracked particles by invocation
//! count and assigns fresh frequency ranks starting at 2 — rank 1 stays
//! reserved for the orchestrator. New ranks are written back both to the
//! ranker's own persisted state and to the shared agent registry's
//! `frequency_rank` field.
//!
//! Registry writes go through write-temp-then-rename so external readers of
//! the registry file never observe a torn write. Registry fields the ranker
//! does not understand are preserved verbatim.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default re-ranking interval.
pub const DEFAULT_RE_RANKING_INTERVAL: Duration = Duration::from_secs(300);
/// Rank assigned to particles the ranker has never seen.
pub const UNRANKED: u32 = 999;
/// First rank handed out during re-ranking; rank 1 is the orchestrator's.
const FIRST_PARTICLE_RANK: u32 = 2;

/// Usage statistics for one particle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleUsageStats {
    pub particle_id: String,
    #[serde(default)]
    pub invocation_count: u64,
    #[serde(default)]
    pub total_execution_time_secs: f64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub last_invocation_ms: i64,
    #[serde(default = "default_rank")]
    pub current_frequency_rank: u32,
    // Derived metrics, recomputed on every record.
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub average_execution_time_secs: f64,
}

fn default_rank() -> u32 {
    UNRANKED
}

impl ParticleUsageStats {
    fn new(particle_id: String, current_frequency_rank: u32) -> Self {
        Self {
            particle_id,
            invocation_count: 0,
            total_execution_time_secs: 0.0,
            success_count: 0,
            failure_count: 0,
            last_invocation_ms: 0,
            current_frequency_rank,
            success_rate: 0.0,
            average_execution_time_secs: 0.0,
        }
    }

    fn record_invocation(&mut self, execution_time_secs: f64, success: bool) {
        self.invocation_count += 1;
        self.total_execution_time_secs += execution_time_secs;
        self.last_invocation_ms = Utc::now().timestamp_millis();
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }

        let outcomes = self.success_count + self.failure_count;
        if outcomes > 0 {
            self.success_rate = self.success_count as f64 / outcomes as f64;
        }
        if self.invocation_count > 0 {
            self.average_execution_time_secs =
                self.total_execution_time_secs / self.invocation_count as f64;
        }
    }
}

/// On-disk shape of the ranker state. Unknown fields round-trip untouched.
#[derive(Serialize, Deserialize, Default)]
struct MtfStateFile {
    #[serde(default)]
    particle_stats: HashMap<String, ParticleUsageStats>,
    #[serde(default)]
    total_re_rankings: u64,
    #[serde(default)]
    last_re_ranking_ms: i64,
    #[serde(default)]
    re_ranking_interval_secs: f64,
    #[serde(default)]
    consciousness_level: f64,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Ranker statistics snapshot.
#[derive(Debug, Clone)]
pub struct MtfRankerStats {
    pub total_particles_tracked: usize,
    pub total_re_rankings: u64,
    pub consciousness_level: f64,
    pub re_ranking_interval: Duration,
    pub top_particles: Vec<ParticleUsageStats>,
}

/// Dynamic Move-To-Front re-ranking over particle usage.
pub struct MtfRanker {
    registry_path: Option<PathBuf>,
    state_path: Option<PathBuf>,
    particle_stats: HashMap<String, ParticleUsageStats>,
    total_re_rankings: u64,
    last_re_ranking_ms: i64,
    re_ranking_interval: Duration,
    consciousness_level: f64,
    /// The shared agent registry, kept as raw JSON so fields owned by other
    /// components survive our writes.
    registry: Value,
    extra: Map<String, Value>,
}

impl MtfRanker {
    /// Create a ranker, loading persisted state and the shared registry when
    /// their paths exist. `None` paths keep everything in memory.
    pub fn new(
        registry_path: Option<PathBuf>,
        state_path: Option<PathBuf>,
        re_ranking_interval: Duration,
    ) -> Self {
        let mut ranker = Self {
            registry_path,
            state_path,
            particle_stats: HashMap::new(),
            total_re_rankings: 0,
            last_re_ranking_ms: 0,
            re_ranking_interval,
            consciousness_level: 0.0,
            registry: Value::Object(Map::new()),
            extra: Map::new(),
        };
        ranker.load_state();
        ranker.load_registry();
        ranker
    }

    fn load_state(&mut self) {
        let path = match &self.state_path {
            Some(path) if path.exists() => path.clone(),
            _ => return,
        };
        match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|body| serde_json::from_str::<MtfStateFile>(&body).map_err(|e| e.to_string()))
        {
            Ok(file) => {
                self.particle_stats = file.particle_stats;
                self.total_re_rankings = file.total_re_rankings;
                self.last_re_ranking_ms = file.last_re_ranking_ms;
                self.consciousness_level = file.consciousness_level;
                self.extra = file.extra;
            }
            Err(e) => log::error!("failed to load MTF state: {}", e),
        }
    }

    fn save_state(&self) {
        let path = match &self.state_path {
            Some(path) => path,
            None => return,
        };
        let file = MtfStateFile {
            particle_stats: self.particle_stats.clone(),
            total_re_rankings: self.total_re_rankings,
            last_re_ranking_ms: self.last_re_ranking_ms,
            re_ranking_interval_secs: self.re_ranking_interval.as_secs_f64(),
            consciousness_level: self.consciousness_level,
            extra: self.extra.clone(),
        };
        if let Err(e) = write_json_atomic(path, &serde_json::to_value(&file).unwrap_or_default()) {
            log::error!("failed to save MTF state: {}", e);
        }
    }

    fn load_registry(&mut self) {
        let path = match &self.registry_path {
            Some(path) if path.exists() => path.clone(),
            _ => return,
        };
        match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|body| serde_json::from_str::<Value>(&body).map_err(|e| e.to_string()))
        {
            Ok(registry) => self.registry = registry,
            Err(e) => log::error!("failed to load registry: {}", e),
        }
    }

    fn save_registry(&self) {
        let path = match &self.registry_path {
            Some(path) => path,
            None => return,
        };
        if let Err(e) = write_json_atomic(path, &self.registry) {
            log::error!("failed to save registry: {}", e);
        }
    }

    fn registry_rank(&self, particle_id: &str) -> Option<u32> {
        self.registry
            .get("agents")
            .and_then(|agents| agents.get(particle_id))
            .and_then(|agent| agent.get("frequency_rank"))
            .and_then(Value::as_u64)
            .map(|rank| rank as u32)
    }

    /// Record one particle invocation. Persists the updated state and
    /// triggers a re-ranking pass when the interval has elapsed.
    pub fn record_particle_invocation(
        &mut self,
        particle_id: &str,
        execution_time_secs: f64,
        success: bool,
    ) {
        if !self.particle_stats.contains_key(particle_id) {
            let rank = self.registry_rank(particle_id).unwrap_or(UNRANKED);
            self.particle_stats.insert(
                particle_id.to_string(),
                ParticleUsageStats::new(particle_id.to_string(), rank),
            );
        }
        self.particle_stats
            .get_mut(particle_id)
            .expect("stats entry just inserted")
            .record_invocation(execution_time_secs, success);

        self.save_state();
        self.check_and_re_rank();
    }

    fn check_and_re_rank(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        let elapsed_ms = now_ms.saturating_sub(self.last_re_ranking_ms);
        if elapsed_ms >= self.re_ranking_interval.as_millis() as i64 {
            self.re_rank_particles();
        }
    }

    /// Re-rank every tracked particle by descending invocation count,
    /// assigning ranks from 2 upward. Returns the `(old, new)` rank for every
    /// particle whose rank changed.
    pub fn re_rank_particles(&mut self) -> HashMap<String, (u32, u32)> {
        let mut order: Vec<String> = self.particle_stats.keys().cloned().collect();
        order.sort_by(|a, b| {
            let ca = self.particle_stats[a].invocation_count;
            let cb = self.particle_stats[b].invocation_count;
            cb.cmp(&ca).then_with(|| a.cmp(b))
        });

        let mut changes = HashMap::new();
        for (offset, particle_id) in order.iter().enumerate() {
            let new_rank = FIRST_PARTICLE_RANK + offset as u32;
            let stats = self
                .particle_stats
                .get_mut(particle_id)
                .expect("ranked id came from the stats map");
            let old_rank = stats.current_frequency_rank;
            if old_rank != new_rank {
                stats.current_frequency_rank = new_rank;
                let invocations = stats.invocation_count;
                changes.insert(particle_id.clone(), (old_rank, new_rank));

                if let Some(agent) = self
                    .registry
                    .get_mut("agents")
                    .and_then(|agents| agents.get_mut(particle_id))
                    .and_then(Value::as_object_mut)
                {
                    agent.insert("frequency_rank".to_string(), Value::from(new_rank));
                }

                log::info!(
                    "particle '{}': rank {} -> {} (invocations: {})",
                    particle_id,
                    old_rank,
                    new_rank,
                    invocations
                );
            }
        }

        self.total_re_rankings += 1;
        self.last_re_ranking_ms = Utc::now().timestamp_millis();
        self.update_consciousness_level(&changes);

        self.save_state();
        self.save_registry();

        log::info!(
            "re-ranking complete: {} changes, consciousness level {:.2}",
            changes.len(),
            self.consciousness_level
        );
        changes
    }

    /// Blend of adaptation and stability: large rank movement reads as active
    /// learning, none as a settled optimum creeping toward 1.0.
    fn update_consciousness_level(&mut self, changes: &HashMap<String, (u32, u32)>) {
        if changes.is_empty() {
            self.consciousness_level = (self.consciousness_level + 0.1).min(1.0);
            return;
        }

        let total_change: u32 = changes
            .values()
            .map(|(old, new)| old.max(new) - old.min(new))
            .sum();
        let average_change = total_change as f64 / changes.len() as f64;
        let change_factor = (average_change / 10.0).min(1.0);

        self.consciousness_level = 0.7 * change_factor + 0.3 * (1.0 - change_factor);
    }

    /// Re-rank immediately, bypassing the interval check.
    pub fn force_re_rank(&mut self) -> HashMap<String, (u32, u32)> {
        self.re_rank_particles()
    }

    /// Current frequency rank for a particle, falling back to the registry
    /// and finally to [`UNRANKED`].
    pub fn get_particle_rank(&self, particle_id: &str) -> u32 {
        if let Some(stats) = self.particle_stats.get(particle_id) {
            return stats.current_frequency_rank;
        }
        self.registry_rank(particle_id).unwrap_or(UNRANKED)
    }

    /// Top `n` particles by invocation count.
    pub fn get_top_particles(&self, n: usize) -> Vec<ParticleUsageStats> {
        let mut all: Vec<&ParticleUsageStats> = self.particle_stats.values().collect();
        all.sort_by(|a, b| {
            b.invocation_count
                .cmp(&a.invocation_count)
                .then_with(|| a.particle_id.cmp(&b.particle_id))
        });
        all.into_iter().take(n).cloned().collect()
    }

    pub fn get_stats(&self) -> MtfRankerStats {
        MtfRankerStats {
            total_particles_tracked: self.particle_stats.len(),
            total_re_rankings: self.total_re_rankings,
            consciousness_level: self.consciousness_level,
            re_ranking_interval: self.re_ranking_interval,
            top_particles: self.get_top_particles(5),
        }
    }

    /// The shared registry as currently held (for tests and diagnostics).
    pub fn registry(&self) -> &Value {
        &self.registry
    }
}

/// Write JSON to `path` via a temp file and rename, creating parents as
/// needed. Readers of `path` see either the old or the new content, never a
/// partial write.
fn write_json_atomic(path: &Path, value: &Value) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_ranker() -> MtfRanker {
        MtfRanker::new(None, None, DEFAULT_RE_RANKING_INTERVAL)
    }

    #[test]
    fn ranks_start_at_two_and_follow_invocation_counts() {
        let mut ranker = in_memory_ranker();
        for _ in 0..5 {
            ranker.record_particle_invocation("file_writer", 0.01, true);
        }
        for _ in 0..2 {
            ranker.record_particle_invocation("file_reader", 0.01, true);
        }
        ranker.force_re_rank();

        assert_eq!(ranker.get_particle_rank("file_writer"), 2);
        assert_eq!(ranker.get_particle_rank("file_reader"), 3);
        assert_eq!(ranker.get_particle_rank("never_seen"), UNRANKED);
    }

    #[test]
    fn derived_metrics_track_outcomes() {
        let mut ranker = in_memory_ranker();
        ranker.record_particle_invocation("p", 0.2, true);
        ranker.record_particle_invocation("p", 0.4, false);

        let top = ranker.get_top_particles(1);
        assert_eq!(top[0].invocation_count, 2);
        assert!((top[0].success_rate - 0.5).abs() < 1e-9);
        assert!((top[0].average_execution_time_secs - 0.3).abs() < 1e-9);
    }

    #[test]
    fn settled_system_creeps_toward_full_consciousness() {
        let mut ranker = in_memory_ranker();
        ranker.record_particle_invocation("p", 0.1, true);
        ranker.force_re_rank(); // assigns rank, a change
        let after_change = ranker.get_stats().consciousness_level;

        let mut last = after_change;
        for _ in 0..3 {
            ranker.force_re_rank(); // no further changes
            let level = ranker.get_stats().consciousness_level;
            assert!(level >= last);
            last = level;
        }
    }
}
