//! Runtime configuration for the substrate.
//!
//! [`CallosumConfig`] is intentionally minimal and constructed manually or
//! from a handful of environment variables — no config-file parsing
//! dependencies are introduced.
//!
//! Recognized environment variables:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `CALLOSUM_MODE` | `reactive` (default) or `direct` — whether tasks flow through the bus or via in-process fallback |
//! | `CALLOSUM_EVENT_STORE` | `memory` forces the in-memory event store |
//! | `CALLOSUM_EVENT_LOG` | Path of the durable event-log stream |
//! | `CALLOSUM_STRICT_DEPS` | `1`/`true` fails startup on missing runtime dependencies instead of warning |

use std::env;
use std::path::PathBuf;

/// How the orchestrator executes tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Route tasks through the reactive corpus callosum.
    Reactive,
    /// Degraded in-process fallback: invoke agents directly. Bring-up and
    /// testing only.
    Direct,
}

/// Global configuration for the substrate.
#[derive(Debug, Clone)]
pub struct CallosumConfig {
    /// Execution mode selector.
    pub mode: ExecutionMode,
    /// Force the in-memory event store even when an event log is configured.
    pub force_memory_event_store: bool,
    /// Path of the durable event-log stream, when event sourcing should
    /// persist.
    pub event_log_path: Option<PathBuf>,
    /// Fail hard on missing runtime dependencies instead of degrading with a
    /// warning.
    pub strict_dependencies: bool,
}

impl Default for CallosumConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Reactive,
            force_memory_event_store: false,
            event_log_path: None,
            strict_dependencies: false,
        }
    }
}

impl CallosumConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mode = match env::var("CALLOSUM_MODE").ok().as_deref() {
            Some("direct") => ExecutionMode::Direct,
            Some("reactive") | None => ExecutionMode::Reactive,
            Some(other) => {
                log::warn!("unknown CALLOSUM_MODE '{}', using reactive", other);
                ExecutionMode::Reactive
            }
        };

        let force_memory_event_store = matches!(
            env::var("CALLOSUM_EVENT_STORE").ok().as_deref(),
            Some("memory")
        );

        let event_log_path = env::var("CALLOSUM_EVENT_LOG")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let strict_dependencies = matches!(
            env::var("CALLOSUM_STRICT_DEPS").ok().as_deref(),
            Some("1") | Some("true")
        );

        Self {
            mode,
            force_memory_event_store,
            event_log_path,
            strict_dependencies,
        }
    }
}
