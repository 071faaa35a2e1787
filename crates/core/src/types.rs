use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a job inside one workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by a function executor when a function is registered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionHandle(pub String);

impl FunctionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for FunctionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job's functions actually ran.
///
/// Stays `Pending` until an executor accepts the first invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Environment {
    #[default]
    Pending,
    Local,
    Other(String),
}

impl Environment {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Local => "local",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Environment {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => Self::Pending,
            "local" => Self::Local,
            _ => Self::Other(value),
        }
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived state of a job, computed by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Suspend,
    Ready,
    Processing,
    Done,
    Failed,
}

/// State of a single pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuncState {
    Ready,
    Processing,
    Done,
    Failed,
}

fn default_handler() -> String {
    "index.handler".to_string()
}

fn default_role() -> String {
    "-".to_string()
}

fn default_runtime() -> String {
    "local".to_string()
}

fn default_path() -> String {
    "$".to_string()
}

/// Configuration of one pipeline step.
///
/// `handler`, `role`, `runtime`, `memory_size` and `timeout_secs` are passed
/// through to the executor untouched. The four path fields drive how data
/// flows into and out of the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncOptions {
    #[serde(default)]
    pub function_name: Option<String>,

    #[serde(default = "default_handler")]
    pub handler: String,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default)]
    pub memory_size: Option<u32>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Read path selecting the step input. Defaults to `$`.
    #[serde(default = "default_path")]
    pub input_path: String,

    /// Read path selecting the step output after the result merge. Defaults to `$`.
    #[serde(default = "default_path")]
    pub output_path: String,

    /// Dot-only write path where the raw result is merged. Defaults to `$`.
    #[serde(default = "default_path")]
    pub result_path: String,

    /// Literal values, or read-path references for keys ending in `.$`.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Default for FuncOptions {
    fn default() -> Self {
        Self {
            function_name: None,
            handler: default_handler(),
            role: default_role(),
            runtime: default_runtime(),
            memory_size: None,
            timeout_secs: None,
            input_path: default_path(),
            output_path: default_path(),
            result_path: default_path(),
            parameters: Map::new(),
        }
    }
}

impl FuncOptions {
    /// Apply every field set in `overrides` on top of these options.
    pub fn merged(&self, overrides: &FuncOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(name) = &overrides.function_name {
            merged.function_name = Some(name.clone());
        }
        if let Some(handler) = &overrides.handler {
            merged.handler = handler.clone();
        }
        if let Some(role) = &overrides.role {
            merged.role = role.clone();
        }
        if let Some(runtime) = &overrides.runtime {
            merged.runtime = runtime.clone();
        }
        if overrides.memory_size.is_some() {
            merged.memory_size = overrides.memory_size;
        }
        if overrides.timeout_secs.is_some() {
            merged.timeout_secs = overrides.timeout_secs;
        }
        if let Some(path) = &overrides.input_path {
            merged.input_path = path.clone();
        }
        if let Some(path) = &overrides.output_path {
            merged.output_path = path.clone();
        }
        if let Some(path) = &overrides.result_path {
            merged.result_path = path.clone();
        }
        if let Some(parameters) = &overrides.parameters {
            merged.parameters = parameters.clone();
        }
        merged
    }
}

/// Partial step configuration layered over [`FuncOptions`] defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncOverrides {
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub memory_size: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub input_path: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub result_path: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

impl FuncOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    pub fn memory_size(mut self, megabytes: u32) -> Self {
        self.memory_size = Some(megabytes);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn input_path(mut self, path: impl Into<String>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn result_path(mut self, path: impl Into<String>) -> Self {
        self.result_path = Some(path.into());
        self
    }

    /// Add one parameter. Keys ending in `.$` are resolved as read paths.
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Live snapshot of one pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncStat {
    pub name: String,
    #[serde(flatten)]
    pub options: FuncOptions,
    pub state: FuncState,
    /// Step input after InputPath, before Parameters
    pub event: Option<Value>,
    /// Payload handed to the executor
    pub payload: Option<Value>,
    /// Executor output before the ResultPath merge
    pub raw_results: Option<Value>,
    /// Step input with the raw result merged at ResultPath, before OutputPath
    pub results: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FuncStat {
    pub fn new(name: String, options: FuncOptions) -> Self {
        Self {
            name,
            options,
            state: FuncState::Ready,
            event: None,
            payload: None,
            raw_results: None,
            results: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Per-job snapshot for external consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStat {
    pub id: JobId,
    pub name: String,
    pub environment: Environment,
    pub state: JobState,
    pub from_job_ids: Vec<JobId>,
    pub to_job_ids: Vec<JobId>,
    pub is_start_job: bool,
    pub is_terminus_job: bool,
    pub funcs: Vec<FuncStat>,
    pub payload: Option<Value>,
    pub results: Option<Value>,
}
