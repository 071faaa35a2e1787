//! A job: one node of the workflow graph and its ordered step pipeline.
//!
//! Each step reads its input with `InputPath`, applies `Parameters`, invokes
//! the function executor, merges the raw result at `ResultPath` and selects
//! its output with `OutputPath`. The output of one step is the input of the
//! next; the last output is the job result.

use crate::error::{FlowError, Result};
use crate::events::{EventContext, EventManager, EventName, FuncContext, JobContext, WorkflowContext};
use crate::executor::{FunctionErrorBody, FunctionExecutor, StepFunction};
use crate::graph::GraphNode;
use crate::path::{apply_parameters, merge_by_result_path, query};
use crate::types::{
    Environment, FuncOptions, FuncOverrides, FuncStat, FuncState, FunctionHandle, JobId, JobState,
    JobStat,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct FuncEntry {
    stat: FuncStat,
    handle: Option<FunctionHandle>,
}

#[derive(Default)]
struct JobRuntime {
    funcs: Vec<FuncEntry>,
    environment: Environment,
    payload: Option<Value>,
    results: Option<Value>,
}

pub struct Job {
    id: JobId,
    name: String,
    workflow_name: String,
    defaults: FuncOptions,
    events: Arc<EventManager>,
    executor: Arc<dyn FunctionExecutor>,
    runtime: Mutex<JobRuntime>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        name: Option<String>,
        workflow_name: String,
        defaults: FuncOptions,
        events: Arc<EventManager>,
        executor: Arc<dyn FunctionExecutor>,
    ) -> Self {
        Self {
            id,
            name: name.unwrap_or_else(|| format!("job{}", id)),
            workflow_name,
            defaults,
            events,
            executor,
            runtime: Mutex::new(JobRuntime::default()),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// Environment reported by the last accepted invocation
    pub fn environment(&self) -> Environment {
        self.lock().environment.clone()
    }

    /// Input the job was run with
    pub fn payload(&self) -> Option<Value> {
        self.lock().payload.clone()
    }

    /// Output of the last step, once the job has finished
    pub fn results(&self) -> Option<Value> {
        self.lock().results.clone()
    }

    pub fn func_stats(&self) -> Vec<FuncStat> {
        self.lock().funcs.iter().map(|f| f.stat.clone()).collect()
    }

    pub fn func_count(&self) -> usize {
        self.lock().funcs.len()
    }

    /// Append a step to the pipeline and register it with the executor.
    ///
    /// Returns the registered function name,
    /// `<job name>-<function_name>` or `<job name>-function<index>`.
    pub async fn add_func(&self, function: StepFunction, overrides: FuncOverrides) -> Result<String> {
        let options = self.defaults.merged(&overrides);

        let (index, func_name) = {
            let mut runtime = self.lock();
            let index = runtime.funcs.len();
            let suffix = options
                .function_name
                .clone()
                .unwrap_or_else(|| format!("function{}", index));
            let func_name = format!("{}-{}", self.name, suffix);
            runtime.funcs.push(FuncEntry {
                stat: FuncStat::new(func_name.clone(), options.clone()),
                handle: None,
            });
            (index, func_name)
        };

        let handle = match self.executor.register(&func_name, function, &options).await {
            Ok(handle) => handle,
            Err(source) => {
                self.lock().funcs[index].stat.state = FuncState::Failed;
                return Err(FlowError::Registration { func_name, source });
            }
        };
        self.lock().funcs[index].handle = Some(handle);

        tracing::debug!("Added function {} to job {}", func_name, self.name);
        let ctx = self.func_context(&func_name, json!({}), json!({}));
        self.events.dispatch(EventName::AddFunc, &ctx)?;

        Ok(func_name)
    }

    /// Run every step in order, threading each output into the next step
    pub async fn run(&self, payload: Value) -> Result<Value> {
        self.lock().payload = Some(payload.clone());

        let mut current = payload;
        for index in 0..self.func_count() {
            current = self.run_step(index, current).await?;
        }

        self.lock().results = Some(current.clone());
        Ok(current)
    }

    async fn run_step(&self, index: usize, current: Value) -> Result<Value> {
        let (func_name, options, handle) = {
            let runtime = self.lock();
            let entry = &runtime.funcs[index];
            (entry.stat.name.clone(), entry.stat.options.clone(), entry.handle.clone())
        };

        match self.execute_step(index, &func_name, &options, handle, &current).await {
            Ok(output) => Ok(output),
            Err(e) => {
                {
                    let mut runtime = self.lock();
                    let stat = &mut runtime.funcs[index].stat;
                    stat.state = FuncState::Failed;
                    stat.finished_at = Some(Utc::now());
                }
                tracing::warn!("Function {} failed: {}", func_name, e);

                let ctx = self.func_context(&func_name, current, json!({}));
                self.events.dispatch(EventName::FailFunc, &ctx)?;
                Err(e)
            }
        }
    }

    async fn execute_step(
        &self,
        index: usize,
        func_name: &str,
        options: &FuncOptions,
        handle: Option<FunctionHandle>,
        current: &Value,
    ) -> Result<Value> {
        let filtered = query(current, &options.input_path)?.clone();
        let payload = apply_parameters(&filtered, &options.parameters)?;

        {
            let mut runtime = self.lock();
            let stat = &mut runtime.funcs[index].stat;
            stat.event = Some(filtered);
            stat.payload = Some(payload.clone());
        }
        let ctx = self.func_context(func_name, payload.clone(), json!({}));
        self.events.dispatch(EventName::StartFunc, &ctx)?;
        {
            let mut runtime = self.lock();
            let stat = &mut runtime.funcs[index].stat;
            stat.state = FuncState::Processing;
            stat.started_at = Some(Utc::now());
        }

        let raw = self.invoke(func_name, handle, current, &payload).await?;
        let merged = merge_by_result_path(&payload, raw.clone(), &options.result_path)?;
        let output = query(&merged, &options.output_path)?.clone();

        {
            let mut runtime = self.lock();
            let stat = &mut runtime.funcs[index].stat;
            stat.raw_results = Some(raw);
            stat.results = Some(merged);
            stat.state = FuncState::Done;
            stat.finished_at = Some(Utc::now());
        }
        let ctx = self.func_context(func_name, payload, output.clone());
        self.events.dispatch(EventName::FinishFunc, &ctx)?;

        Ok(output)
    }

    async fn invoke(
        &self,
        func_name: &str,
        handle: Option<FunctionHandle>,
        current: &Value,
        payload: &Value,
    ) -> Result<Value> {
        let Some(handle) = handle else {
            return Err(self
                .invocation_error(current, func_name, "function was never registered".to_string())
                .await);
        };

        tracing::debug!("Invoking {} for job {}", func_name, self.name);
        let response = match self.executor.invoke(&handle, &payload.to_string()).await {
            Ok(response) => response,
            Err(e) => return Err(self.invocation_error(current, func_name, format!("{:#}", e)).await),
        };

        if !response.environment.is_pending() {
            self.lock().environment = response.environment.clone();
        }

        if response.is_error() {
            let message = FunctionErrorBody::describe(&response);
            return Err(self.invocation_error(current, func_name, message).await);
        }

        match serde_json::from_str(&response.payload) {
            Ok(value) => Ok(value),
            Err(e) => Err(self
                .invocation_error(current, func_name, format!("invalid JSON result: {}", e))
                .await),
        }
    }

    async fn invocation_error(&self, current: &Value, func_name: &str, message: String) -> FlowError {
        FlowError::Invocation {
            current_data: current.to_string(),
            func_name: func_name.to_string(),
            registered: self.executor.registered_functions().await,
            message,
        }
    }

    fn func_context(&self, func_name: &str, payload: Value, result: Value) -> EventContext {
        let (environment, func_stats) = {
            let runtime = self.lock();
            let stats = runtime.funcs.iter().map(|f| f.stat.clone()).collect();
            (runtime.environment.clone(), stats)
        };

        EventContext::Func(FuncContext {
            job: JobContext {
                workflow: WorkflowContext {
                    workflow_name: self.workflow_name.clone(),
                    payload,
                    result,
                },
                job_name: self.name.clone(),
            },
            func_name: func_name.to_string(),
            environment,
            func_stats,
        })
    }

    pub(crate) fn snapshot(
        &self,
        state: JobState,
        from_job_ids: Vec<JobId>,
        to_job_ids: Vec<JobId>,
    ) -> JobStat {
        let runtime = self.lock();
        JobStat {
            id: self.id,
            name: self.name.clone(),
            environment: runtime.environment.clone(),
            state,
            is_start_job: from_job_ids.is_empty(),
            is_terminus_job: to_job_ids.is_empty(),
            from_job_ids,
            to_job_ids,
            funcs: runtime.funcs.iter().map(|f| f.stat.clone()).collect(),
            payload: runtime.payload.clone(),
            results: runtime.results.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GraphNode for Job {
    fn id(&self) -> JobId {
        self.id
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("workflow_name", &self.workflow_name)
            .finish()
    }
}
