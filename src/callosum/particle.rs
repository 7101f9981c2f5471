//! Persisted per-particle state.
//!
//! Particles themselves live outside the core (they are External-tract agent
//! consumers doing one concrete thing each), but the state file they persist
//! between runs is part of the shared surface: cycle counts, execution
//! totals, success rate, and a free-form custom-metric bag. Fields this crate
//! does not know about are preserved on read and written back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;

/// Durable state for one particle.
///
/// # Example
///
/// ```rust
/// use callosum::particle::ParticleState;
///
/// let mut state = ParticleState::new("file_writer");
/// state.init_custom_metric("files_created", 0);
/// state.record_execution(0.004, true);
/// state.add_to_custom_metric("files_created", 1);
///
/// assert_eq!(state.total_executions, 1);
/// assert_eq!(state.success_rate, 1.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleState {
    pub particle_id: String,
    /// Completed micro-loop cycles.
    #[serde(default)]
    pub cycle_count: u64,
    #[serde(default)]
    pub total_executions: u64,
    #[serde(default)]
    pub successful_executions: u64,
    #[serde(default)]
    pub failed_executions: u64,
    #[serde(default)]
    pub total_execution_time_secs: f64,
    #[serde(default)]
    pub success_rate: f64,
    /// Particle-specific counters (bytes written, files moved, ...).
    #[serde(default)]
    pub custom_metrics: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParticleState {
    pub fn new(particle_id: impl Into<String>) -> Self {
        Self {
            particle_id: particle_id.into(),
            cycle_count: 0,
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            total_execution_time_secs: 0.0,
            success_rate: 0.0,
            custom_metrics: Map::new(),
            extra: Map::new(),
        }
    }

    /// Record one execution cycle and refresh the derived success rate.
    pub fn record_execution(&mut self, execution_time_secs: f64, success: bool) {
        self.cycle_count += 1;
        self.total_executions += 1;
        self.total_execution_time_secs += execution_time_secs;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        self.success_rate = self.successful_executions as f64 / self.total_executions as f64;
    }

    /// Ensure a custom metric exists, without clobbering a loaded value.
    pub fn init_custom_metric(&mut self, name: &str, initial: i64) {
        self.custom_metrics
            .entry(name.to_string())
            .or_insert_with(|| Value::from(initial));
    }

    /// Add `delta` to a numeric custom metric (creating it at `delta`).
    pub fn add_to_custom_metric(&mut self, name: &str, delta: i64) {
        let current = self
            .custom_metrics
            .get(name)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        self.custom_metrics
            .insert(name.to_string(), Value::from(current + delta));
    }

    /// Load state from a JSON file.
    pub fn load(path: &Path) -> io::Result<ParticleState> {
        let body = fs::read_to_string(path)?;
        serde_json::from_str(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Persist state as pretty JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, body)
    }
}
