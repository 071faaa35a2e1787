//! Error types for the fanflow engine.

use crate::types::JobId;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while building or running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A node with the same id is already registered in the graph.
    #[error("specified id node already exist: {0}")]
    DuplicateId(JobId),

    /// An edge or query referenced a node the graph does not know.
    #[error("node not registered in graph: {0}")]
    UnknownNode(JobId),

    /// The graph contains a cycle and cyclic graphs were rejected.
    #[error("graph contains a cycle through node {0}")]
    CyclicGraph(JobId),

    /// A read or write path could not be parsed.
    #[error("invalid path '{path}': {reason}")]
    PathSyntax { path: String, reason: String },

    /// InputPath/OutputPath matched nothing in the payload.
    #[error("no value matches path '{path}' in payload: {payload}")]
    PathResolution { path: String, payload: String },

    /// A `.$` parameter reference matched zero or several values.
    #[error("{0}")]
    ReferenceResolution(String),

    /// A keyed write could not be applied to the target value.
    #[error("failed to merge result: {0}")]
    Merge(String),

    /// The function executor failed or the function reported a handled error.
    #[error(
        "failed to execute function: currentData={current_data}, funcName={func_name}, registered functions={registered:?}, {message}"
    )]
    Invocation {
        current_data: String,
        func_name: String,
        registered: Vec<String>,
        message: String,
    },

    /// The function executor refused to register a function.
    #[error("failed to register function {func_name}: {source}")]
    Registration {
        func_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The scheduler was asked to do something its state does not allow.
    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariant(String),

    /// An event subscriber returned an error.
    #[error("handler for event '{event}' failed: {source}")]
    EventHandler {
        event: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A spawned job branch panicked or was aborted.
    #[error("job branch did not complete: {0}")]
    TaskJoin(String),
}

impl FlowError {
    pub(crate) fn path_syntax(path: &str, reason: impl Into<String>) -> Self {
        Self::PathSyntax {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error came from the function executor rather than the engine.
    pub fn is_invocation(&self) -> bool {
        matches!(self, Self::Invocation { .. })
    }
}
