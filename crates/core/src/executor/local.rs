use super::{FunctionErrorBody, FunctionExecutor, InvokeResponse, StepError, StepFunction};
use crate::types::{Environment, FuncOptions, FunctionHandle};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

struct Registered {
    function: StepFunction,
    timeout_secs: Option<u64>,
}

#[derive(Default)]
struct Registry {
    functions: HashMap<String, Registered>,
    order: Vec<String>,
}

/// In-process executor that runs step functions on the caller's runtime
#[derive(Default)]
pub struct LocalExecutor {
    registry: RwLock<Registry>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn failure(error_type: &str, message: String) -> Result<InvokeResponse> {
        let body = FunctionErrorBody {
            error_type: error_type.to_string(),
            error_message: message,
        };
        Ok(InvokeResponse {
            payload: serde_json::to_string(&body)?,
            function_error: Some("Handled".to_string()),
            environment: Environment::Local,
        })
    }
}

#[async_trait::async_trait]
impl FunctionExecutor for LocalExecutor {
    async fn register(
        &self,
        name: &str,
        function: StepFunction,
        options: &FuncOptions,
    ) -> Result<FunctionHandle> {
        let mut registry = self.registry.write().await;
        if !registry.functions.contains_key(name) {
            registry.order.push(name.to_string());
        }
        // Re-registering a name replaces the previous deployment
        registry.functions.insert(
            name.to_string(),
            Registered {
                function,
                timeout_secs: options.timeout_secs,
            },
        );

        tracing::debug!("Registered local function {} ({})", name, options.handler);
        Ok(FunctionHandle::new(name))
    }

    async fn invoke(&self, handle: &FunctionHandle, payload: &str) -> Result<InvokeResponse> {
        let (function, timeout_secs) = {
            let registry = self.registry.read().await;
            let registered = registry
                .functions
                .get(&handle.0)
                .ok_or_else(|| anyhow!("function not found: {}", handle))?;
            (registered.function.clone(), registered.timeout_secs)
        };

        let event: Value = serde_json::from_str(payload)
            .with_context(|| format!("invalid JSON payload for {}", handle))?;

        let result = if let Some(secs) = timeout_secs {
            match timeout(Duration::from_secs(secs), function(event)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Function {} timed out", handle);
                    return Self::failure(
                        "TimeoutError",
                        format!("function timed out after {} seconds", secs),
                    );
                }
            }
        } else {
            function(event).await
        };

        match result {
            Ok(value) => Ok(InvokeResponse::ok(value.to_string(), Environment::Local)),
            Err(e) => {
                let error_type = e
                    .downcast_ref::<StepError>()
                    .map(|s| s.error_type.clone())
                    .unwrap_or_else(|| "Error".to_string());
                Self::failure(&error_type, e.to_string())
            }
        }
    }

    async fn registered_functions(&self) -> Vec<String> {
        self.registry.read().await.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::step_fn;
    use serde_json::json;

    fn add_one() -> StepFunction {
        step_fn(|event: Value| async move {
            let n = event["n"].as_i64().unwrap_or(0);
            Ok(json!({ "n": n + 1 }))
        })
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let executor = LocalExecutor::new();
        let handle = executor
            .register("job0-function0", add_one(), &FuncOptions::default())
            .await
            .unwrap();

        let response = executor.invoke(&handle, r#"{"n":1}"#).await.unwrap();
        assert!(!response.is_error());
        assert_eq!(response.environment, Environment::Local);
        assert_eq!(serde_json::from_str::<Value>(&response.payload).unwrap(), json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn test_registered_functions_keep_order() {
        let executor = LocalExecutor::new();
        for name in ["b", "a", "b"] {
            executor
                .register(name, add_one(), &FuncOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(executor.registered_functions().await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_executor_error() {
        let executor = LocalExecutor::new();
        let result = executor.invoke(&FunctionHandle::new("missing"), "{}").await;
        assert!(result.unwrap_err().to_string().contains("function not found"));
    }

    #[tokio::test]
    async fn test_function_error_is_handled() {
        let executor = LocalExecutor::new();
        let failing = step_fn(|_| async {
            Err(anyhow::Error::new(StepError::new("ValidationError", "count missing")))
        });
        let handle = executor
            .register("f", failing, &FuncOptions::default())
            .await
            .unwrap();

        let response = executor.invoke(&handle, "{}").await.unwrap();
        assert_eq!(response.function_error.as_deref(), Some("Handled"));
        assert_eq!(
            FunctionErrorBody::describe(&response),
            "error type:ValidationError message:count missing"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_function_error() {
        let executor = LocalExecutor::new();
        let slow = step_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        });
        let options = FuncOptions {
            timeout_secs: Some(1),
            ..FuncOptions::default()
        };
        let handle = executor.register("slow", slow, &options).await.unwrap();

        let response = executor.invoke(&handle, "{}").await.unwrap();
        assert!(response.is_error());
        assert!(FunctionErrorBody::describe(&response).contains("TimeoutError"));
    }
}
