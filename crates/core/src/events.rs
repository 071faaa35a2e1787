use crate::error::{FlowError, Result};
use crate::job::Job;
use crate::types::{Environment, FuncStat, JobStat};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Lifecycle events a workflow emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventName {
    AddNewJob,
    AddFunc,
    Start,
    StartJob,
    StartFunc,
    FinishFunc,
    FailFunc,
    FinishJob,
    Finish,
}

impl EventName {
    pub const ALL: [EventName; 9] = [
        Self::AddNewJob,
        Self::AddFunc,
        Self::Start,
        Self::StartJob,
        Self::StartFunc,
        Self::FinishFunc,
        Self::FailFunc,
        Self::FinishJob,
        Self::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddNewJob => "addNewJob",
            Self::AddFunc => "addFunc",
            Self::Start => "start",
            Self::StartJob => "startJob",
            Self::StartFunc => "startFunc",
            Self::FinishFunc => "finishFunc",
            Self::FailFunc => "failFunc",
            Self::FinishJob => "finishJob",
            Self::Finish => "finish",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow-level event data (`start`, `finish`)
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowContext {
    pub workflow_name: String,
    pub payload: Value,
    pub result: Value,
}

impl WorkflowContext {
    pub fn new(workflow_name: impl Into<String>, payload: Value) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            payload,
            result: json!({}),
        }
    }
}

/// Job-level event data (`addNewJob`, `startJob`)
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub workflow: WorkflowContext,
    pub job_name: String,
}

impl JobContext {
    pub fn new(workflow_name: impl Into<String>, job_name: impl Into<String>, payload: Value) -> Self {
        Self {
            workflow: WorkflowContext::new(workflow_name, payload),
            job_name: job_name.into(),
        }
    }
}

/// Data for `finishJob`
#[derive(Debug, Clone)]
pub struct FinishJobContext {
    pub job: JobContext,
    pub stats: Vec<JobStat>,
    pub next_jobs: Vec<Arc<Job>>,
}

/// Function-level event data (`addFunc`, `startFunc`, `finishFunc`, `failFunc`)
#[derive(Debug, Clone)]
pub struct FuncContext {
    pub job: JobContext,
    pub func_name: String,
    pub environment: Environment,
    pub func_stats: Vec<FuncStat>,
}

/// Payload delivered to every handler
#[derive(Debug, Clone)]
pub enum EventContext {
    Workflow(WorkflowContext),
    Job(JobContext),
    FinishJob(FinishJobContext),
    Func(FuncContext),
}

impl EventContext {
    pub fn workflow(&self) -> &WorkflowContext {
        match self {
            Self::Workflow(ctx) => ctx,
            Self::Job(ctx) => &ctx.workflow,
            Self::FinishJob(ctx) => &ctx.job.workflow,
            Self::Func(ctx) => &ctx.job.workflow,
        }
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow().workflow_name
    }

    pub fn payload(&self) -> &Value {
        &self.workflow().payload
    }

    pub fn result(&self) -> &Value {
        &self.workflow().result
    }

    pub fn job_name(&self) -> Option<&str> {
        match self {
            Self::Workflow(_) => None,
            Self::Job(ctx) => Some(&ctx.job_name),
            Self::FinishJob(ctx) => Some(&ctx.job.job_name),
            Self::Func(ctx) => Some(&ctx.job.job_name),
        }
    }

    pub fn func_name(&self) -> Option<&str> {
        match self {
            Self::Func(ctx) => Some(&ctx.func_name),
            _ => None,
        }
    }
}

/// Callback invoked synchronously for a subscribed event
pub type EventHandler = Arc<dyn Fn(EventName, &EventContext) -> anyhow::Result<()> + Send + Sync>;

/// Handlers keyed by event name
pub type EventHandlers = HashMap<EventName, Vec<EventHandler>>;

/// Wrap a closure as an [`EventHandler`]
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(EventName, &EventContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Synchronous publish/subscribe registry for lifecycle events
#[derive(Default)]
pub struct EventManager {
    handlers: RwLock<EventHandlers>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handlers(handlers: EventHandlers) -> Self {
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Replace the handler list of every event named in `partial`.
    /// Events not named keep their current handlers.
    pub fn update_handlers(&self, partial: EventHandlers) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for (name, list) in partial {
            handlers.insert(name, list);
        }
    }

    /// Append one handler for `name`
    pub fn subscribe(&self, name: EventName, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, name: EventName) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .map_or(0, Vec::len)
    }

    /// Call every handler for `name` in registration order.
    ///
    /// The first handler error stops the dispatch and is returned to the caller.
    pub fn dispatch(&self, name: EventName, context: &EventContext) -> Result<()> {
        // Snapshot so handlers may subscribe without deadlocking
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            return Ok(());
        }

        tracing::debug!("Dispatching {} to {} handler(s)", name, handlers.len());
        for handler in handlers {
            handler(name, context).map_err(|source| FlowError::EventHandler {
                event: name.as_str(),
                source,
            })?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("EventManager").field("handlers", &counts).finish()
    }
}
