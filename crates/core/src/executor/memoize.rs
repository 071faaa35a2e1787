use super::{FunctionExecutor, InvokeResponse, StepFunction};
use crate::types::{FuncOptions, FunctionHandle};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Caching wrapper around another executor.
///
/// Successful responses are stored per (function, payload) and replayed
/// without invoking the inner executor again. Failed invocations are never
/// cached.
pub struct MemoizingExecutor<E> {
    inner: E,
    cache: Mutex<HashMap<(String, String), InvokeResponse>>,
}

impl<E: FunctionExecutor> MemoizingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Number of cached responses
    pub async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }
}

#[async_trait::async_trait]
impl<E: FunctionExecutor> FunctionExecutor for MemoizingExecutor<E> {
    async fn register(
        &self,
        name: &str,
        function: StepFunction,
        options: &FuncOptions,
    ) -> Result<FunctionHandle> {
        let handle = self.inner.register(name, function, options).await?;
        // A redeployed function must not replay stale results
        self.cache.lock().await.retain(|(func, _), _| func != name);
        Ok(handle)
    }

    async fn invoke(&self, handle: &FunctionHandle, payload: &str) -> Result<InvokeResponse> {
        let key = (handle.0.clone(), payload.to_string());
        if let Some(hit) = self.cache.lock().await.get(&key) {
            tracing::debug!("Memoized response for {}", handle);
            return Ok(hit.clone());
        }

        let response = self.inner.invoke(handle, payload).await?;
        if !response.is_error() {
            self.cache.lock().await.insert(key, response.clone());
        }
        Ok(response)
    }

    async fn registered_functions(&self) -> Vec<String> {
        self.inner.registered_functions().await
    }
}
