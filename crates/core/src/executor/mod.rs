// Function executor boundary: where a step's business logic actually runs

pub mod local;
pub mod memoize;

pub use local::LocalExecutor;
pub use memoize::MemoizingExecutor;

use crate::types::{Environment, FuncOptions, FunctionHandle};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a [`StepFunction`]
pub type StepFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Opaque executable reference for one pipeline step
pub type StepFunction = Arc<dyn Fn(Value) -> StepFuture + Send + Sync>;

/// Wrap an async closure as a [`StepFunction`]
pub fn step_fn<F, Fut>(f: F) -> StepFunction
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Outcome of one invocation, as reported by the executor
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResponse {
    /// JSON text produced by the function (or the error body)
    pub payload: String,
    /// Set when the function itself failed; `payload` then holds a [`FunctionErrorBody`]
    pub function_error: Option<String>,
    /// Where the invocation ran
    pub environment: Environment,
}

impl InvokeResponse {
    pub fn ok(payload: String, environment: Environment) -> Self {
        Self {
            payload,
            function_error: None,
            environment,
        }
    }

    pub fn is_error(&self) -> bool {
        self.function_error.is_some()
    }
}

/// Error body carried in the payload of a failed invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionErrorBody {
    pub error_type: String,
    pub error_message: String,
}

impl FunctionErrorBody {
    /// Render a failed response into a human-readable message
    pub fn describe(response: &InvokeResponse) -> String {
        match serde_json::from_str::<FunctionErrorBody>(&response.payload) {
            Ok(body) => format!(
                "error type:{} message:{}",
                body.error_type, body.error_message
            ),
            Err(_) => format!(
                "error type:{} message:{}",
                response.function_error.as_deref().unwrap_or("Unknown"),
                response.payload
            ),
        }
    }
}

/// Error a step function can return to control the reported error type
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    pub error_type: String,
    pub message: String,
}

impl StepError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// Deploys and invokes step functions
#[async_trait::async_trait]
pub trait FunctionExecutor: Send + Sync {
    /// Make `function` invokable under `name`
    async fn register(
        &self,
        name: &str,
        function: StepFunction,
        options: &FuncOptions,
    ) -> anyhow::Result<FunctionHandle>;

    /// Invoke a registered function with a JSON payload.
    ///
    /// `Err` means the executor itself failed. A failure inside the function
    /// is reported through [`InvokeResponse::function_error`].
    async fn invoke(&self, handle: &FunctionHandle, payload: &str) -> anyhow::Result<InvokeResponse>;

    /// Names of every registered function
    async fn registered_functions(&self) -> Vec<String>;
}
