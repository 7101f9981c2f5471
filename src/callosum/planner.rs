//! Internal-tract execution planning.
//!
//! The [`ExecutionPlanner`] is a pure function from a structured
//! [`OrchestratorRequest`] to an ordered [`ExecutionPlan`]: which particle to
//! invoke, with what payload, at what priority. It performs no I/O and routes
//! nothing — execution belongs to the orchestrator.
//!
//! Simple request kinds map to a single [`PlannedAction`]; the composite
//! kinds `create_component` and `scaffold_module` expand into multi-particle
//! workflows. Unknown kinds fail with [`PlannerError::UnknownRequest`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::callosum::id_generator::IdGenerator;

/// Base path substituted when a request omits one.
pub const DEFAULT_BASE_PATH: &str = "/tmp";
/// Priority for ordinary actions, on the orchestrator's 1..=10 scale.
pub const PRIORITY_NORMAL: u8 = 5;
/// Priority for actions later steps depend on (e.g. directory creation).
pub const PRIORITY_HIGH: u8 = 8;
/// Content written when a file request carries none.
pub const DEFAULT_FILE_CONTENT: &str = "";
/// File write mode default.
pub const DEFAULT_FILE_MODE: &str = "w";
/// Text encoding default.
pub const DEFAULT_FILE_ENCODING: &str = "utf-8";
/// Whether directory creation makes missing parents by default.
pub const DEFAULT_CREATE_PARENTS: bool = true;
/// Whether directory deletion recurses by default.
pub const DEFAULT_RECURSIVE_DELETE: bool = false;
/// Language assumed by `scaffold_module` when none is given.
pub const DEFAULT_LANGUAGE: &str = "python";

/// The atomic operations particles execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    WriteFile,
    CreateDirectory,
    ReadFile,
    DeleteFile,
    DeleteDirectory,
    MoveFile,
    BatchCreateFiles,
    ApplyTemplate,
}

impl ActionType {
    /// Symbolic name used in payloads, synthesis records, and pattern
    /// signatures.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::WriteFile => "write_file",
            ActionType::CreateDirectory => "create_directory",
            ActionType::ReadFile => "read_file",
            ActionType::DeleteFile => "delete_file",
            ActionType::DeleteDirectory => "delete_directory",
            ActionType::MoveFile => "move_file",
            ActionType::BatchCreateFiles => "batch_create_files",
            ActionType::ApplyTemplate => "apply_template",
        }
    }

    /// The particle responsible for this action.
    pub fn target_particle(self) -> &'static str {
        match self {
            ActionType::WriteFile => "file_writer",
            ActionType::CreateDirectory => "directory_creator",
            ActionType::ReadFile => "file_reader",
            ActionType::DeleteFile => "file_deleter",
            ActionType::DeleteDirectory => "directory_deleter",
            ActionType::MoveFile => "file_mover",
            ActionType::BatchCreateFiles => "batch_file_creator",
            ActionType::ApplyTemplate => "template_applier",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A high-level request handed to the planner.
///
/// # Example
///
/// ```rust
/// use callosum::planner::OrchestratorRequest;
///
/// let request = OrchestratorRequest::new(
///     "create_file",
///     serde_json::json!({
///         "file_path": "/tmp/hello.txt",
///         "content": "Hello!",
///     }),
/// );
/// assert_eq!(request.request_type, "create_file");
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorRequest {
    /// Request kind, e.g. `"create_file"` or `"scaffold_module"`.
    pub request_type: String,
    /// Kind-specific parameters as a JSON object.
    pub parameters: Value,
}

impl OrchestratorRequest {
    pub fn new(request_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            request_type: request_type.into(),
            parameters,
        }
    }
}

/// One step in an [`ExecutionPlan`].
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub action_id: String,
    pub action_type: ActionType,
    /// Name of the particle this action is addressed to.
    pub target_particle: String,
    /// The payload the particle receives.
    pub payload: Value,
    /// Priority on the orchestrator's 1..=10 scale.
    pub priority: u8,
}

/// Ordered actions produced for one request.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
    pub actions: Vec<PlannedAction>,
}

impl ExecutionPlan {
    /// The plan's action-kind signature, used for pattern matching.
    pub fn action_sequence(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|a| a.action_type.as_str().to_string())
            .collect()
    }
}

/// Planning failures. These surface to the caller — nothing is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// The request kind is not recognized.
    UnknownRequest(String),
    /// A parameter without a default was absent.
    MissingParameter {
        request_type: String,
        parameter: &'static str,
    },
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::UnknownRequest(kind) => {
                write!(f, "Unknown request type: '{}'", kind)
            }
            PlannerError::MissingParameter {
                request_type,
                parameter,
            } => write!(
                f,
                "Request '{}' is missing required parameter '{}'",
                request_type, parameter
            ),
        }
    }
}

impl std::error::Error for PlannerError {}

/// Planner statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerStats {
    pub plans_generated: u64,
}

/// Pure, deterministic planner: request in, ordered actions out.
pub struct ExecutionPlanner {
    ids: IdGenerator,
    plans_generated: AtomicU64,
}

impl Default for ExecutionPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPlanner {
    pub fn new() -> Self {
        Self {
            ids: IdGenerator::new(),
            plans_generated: AtomicU64::new(0),
        }
    }

    /// Generate the execution plan for a request.
    pub fn plan(&self, request: &OrchestratorRequest) -> Result<ExecutionPlan, PlannerError> {
        let params = Params::new(&request.request_type, &request.parameters);

        let actions = match request.request_type.as_str() {
            "create_file" => vec![self.action(
                ActionType::WriteFile,
                json!({
                    "file_path": params.required("file_path")?,
                    "content": params.string("content", DEFAULT_FILE_CONTENT),
                    "mode": params.string("mode", DEFAULT_FILE_MODE),
                    "encoding": params.string("encoding", DEFAULT_FILE_ENCODING),
                }),
                PRIORITY_NORMAL,
            )],
            "create_directory" => vec![self.action(
                ActionType::CreateDirectory,
                json!({
                    "directory_path": params.required("directory_path")?,
                    "parents": params.boolean("parents", DEFAULT_CREATE_PARENTS),
                }),
                PRIORITY_NORMAL,
            )],
            "read_file" => vec![self.action(
                ActionType::ReadFile,
                json!({
                    "file_path": params.required("file_path")?,
                    "encoding": params.string("encoding", DEFAULT_FILE_ENCODING),
                }),
                PRIORITY_NORMAL,
            )],
            "delete_file" => vec![self.action(
                ActionType::DeleteFile,
                json!({ "file_path": params.required("file_path")? }),
                PRIORITY_NORMAL,
            )],
            "delete_directory" => vec![self.action(
                ActionType::DeleteDirectory,
                json!({
                    "directory_path": params.required("directory_path")?,
                    "recursive": params.boolean("recursive", DEFAULT_RECURSIVE_DELETE),
                }),
                PRIORITY_NORMAL,
            )],
            "move_file" => vec![self.action(
                ActionType::MoveFile,
                json!({
                    "source_path": params.required("source_path")?,
                    "dest_path": params.required("dest_path")?,
                }),
                PRIORITY_NORMAL,
            )],
            "batch_create_files" => vec![self.action(
                ActionType::BatchCreateFiles,
                json!({ "files": params.value("files", json!([])) }),
                PRIORITY_NORMAL,
            )],
            "apply_template" => vec![self.action(
                ActionType::ApplyTemplate,
                json!({
                    "template_name": params.required("template_name")?,
                    "template_content": params.string("template_content", ""),
                    "output_path": params.required("output_path")?,
                    "variables": params.value("variables", json!({})),
                    "encoding": params.string("encoding", DEFAULT_FILE_ENCODING),
                }),
                PRIORITY_NORMAL,
            )],
            "create_component" => self.plan_component(&params)?,
            "scaffold_module" => self.plan_scaffold(&params)?,
            other => return Err(PlannerError::UnknownRequest(other.to_string())),
        };

        self.plans_generated.fetch_add(1, Ordering::Relaxed);

        let content = format!("{}:{}", request.request_type, request.parameters);
        Ok(ExecutionPlan {
            plan_id: self.ids.generate("plan", &content),
            created_at: Utc::now(),
            actions,
        })
    }

    /// `create_component`: directory first (high priority), then a package
    /// init file and the component module.
    fn plan_component(&self, params: &Params<'_>) -> Result<Vec<PlannedAction>, PlannerError> {
        let name = params.required("component_name")?;
        let base_path = params.string("base_path", DEFAULT_BASE_PATH);
        let component_dir = format!("{}/{}", base_path, name);

        Ok(vec![
            self.action(
                ActionType::CreateDirectory,
                json!({ "directory_path": component_dir, "parents": true }),
                PRIORITY_HIGH,
            ),
            self.action(
                ActionType::WriteFile,
                json!({
                    "file_path": format!("{}/__init__.py", component_dir),
                    "content": format!("\"\"\"{} component\"\"\"\n", name),
                    "mode": DEFAULT_FILE_MODE,
                    "encoding": DEFAULT_FILE_ENCODING,
                }),
                PRIORITY_NORMAL,
            ),
            self.action(
                ActionType::WriteFile,
                json!({
                    "file_path": format!("{}/{}.py", component_dir, name),
                    "content": format!(
                        "\"\"\"{} component implementation\"\"\"\n\n\nclass {}:\n    pass\n",
                        name,
                        camel_case(&name)
                    ),
                    "mode": DEFAULT_FILE_MODE,
                    "encoding": DEFAULT_FILE_ENCODING,
                }),
                PRIORITY_NORMAL,
            ),
        ])
    }

    /// `scaffold_module`: ensure the base directory, then apply the
    /// language-specific module template.
    fn plan_scaffold(&self, params: &Params<'_>) -> Result<Vec<PlannedAction>, PlannerError> {
        let name = params.required("module_name")?;
        let base_path = params.string("base_path", DEFAULT_BASE_PATH);
        let language = params.string("language", DEFAULT_LANGUAGE);

        let (template_name, extension) = match language.as_str() {
            "python" => ("python_module", "py"),
            "rust" => ("rust_module", "rs"),
            "go" => ("go_module", "go"),
            "typescript" => ("typescript_module", "ts"),
            // Unrecognized languages fall back to the default.
            _ => ("python_module", "py"),
        };

        Ok(vec![
            self.action(
                ActionType::CreateDirectory,
                json!({ "directory_path": base_path, "parents": true }),
                PRIORITY_NORMAL,
            ),
            self.action(
                ActionType::ApplyTemplate,
                json!({
                    "template_name": template_name,
                    "output_path": format!("{}/{}.{}", base_path, name, extension),
                    "variables": {
                        "module_name": name,
                        "class_name": camel_case(&name),
                    },
                    "encoding": DEFAULT_FILE_ENCODING,
                }),
                PRIORITY_NORMAL,
            ),
        ])
    }

    fn action(&self, action_type: ActionType, payload: Value, priority: u8) -> PlannedAction {
        let content = format!("{}:{}", action_type, payload);
        PlannedAction {
            action_id: self.ids.generate("action", &content),
            action_type,
            target_particle: action_type.target_particle().to_string(),
            payload,
            priority,
        }
    }

    /// Plans generated so far.
    pub fn plans_generated(&self) -> u64 {
        self.plans_generated.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> PlannerStats {
        PlannerStats {
            plans_generated: self.plans_generated(),
        }
    }
}

/// Parameter lookup over a request's JSON object, with the defaults table
/// applied at the call sites.
struct Params<'a> {
    request_type: &'a str,
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Params<'a> {
    fn new(request_type: &'a str, parameters: &'a Value) -> Self {
        Self {
            request_type,
            map: parameters.as_object(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(key))
    }

    fn required(&self, key: &'static str) -> Result<String, PlannerError> {
        self.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(PlannerError::MissingParameter {
                request_type: self.request_type.to_string(),
                parameter: key,
            })
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }

    fn boolean(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn value(&self, key: &str, default: Value) -> Value {
        self.get(key).cloned().unwrap_or(default)
    }
}

/// `snake_case` → `CamelCase` for generated class names.
fn camel_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
