// Workflow orchestration: recursive fan-out/fan-in over the job graph

use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use crate::events::{
    EventContext, EventHandler, EventHandlers, EventManager, EventName, FinishJobContext,
    JobContext, WorkflowContext,
};
use crate::executor::FunctionExecutor;
use crate::job::Job;
use crate::scheduler::Scheduler;
use crate::types::{FuncOptions, JobStat};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

struct WorkflowInner {
    config: EngineConfig,
    defaults: FuncOptions,
    events: Arc<EventManager>,
    executor: Arc<dyn FunctionExecutor>,
    scheduler: Scheduler,
}

/// A DAG of jobs plus the machinery to run it.
///
/// Cloning is cheap and every clone drives the same graph.
#[derive(Clone)]
pub struct Workflow {
    inner: Arc<WorkflowInner>,
}

impl Workflow {
    pub fn new(executor: Arc<dyn FunctionExecutor>) -> Self {
        Self::with_config(EngineConfig::default(), executor)
    }

    pub fn with_config(config: EngineConfig, executor: Arc<dyn FunctionExecutor>) -> Self {
        Self {
            inner: Arc::new(WorkflowInner {
                defaults: config.func_defaults(),
                config,
                events: Arc::new(EventManager::new()),
                executor,
                scheduler: Scheduler::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.inner.events
    }

    /// Create a job named `job<id>`
    pub fn new_job(&self) -> Result<Arc<Job>> {
        self.create_job(None)
    }

    pub fn new_named_job(&self, name: impl Into<String>) -> Result<Arc<Job>> {
        self.create_job(Some(name.into()))
    }

    fn create_job(&self, name: Option<String>) -> Result<Arc<Job>> {
        let inner = &self.inner;
        let job = inner.scheduler.add_job_with(|id| {
            Job::new(
                id,
                name,
                inner.config.name.clone(),
                inner.defaults.clone(),
                inner.events.clone(),
                inner.executor.clone(),
            )
        })?;

        tracing::debug!("Added job {} ({}) to {}", job.name(), job.id(), inner.config.name);
        let ctx = EventContext::Job(JobContext::new(
            inner.config.name.clone(),
            job.name(),
            Value::Object(Default::default()),
        ));
        inner.events.dispatch(EventName::AddNewJob, &ctx)?;

        Ok(job)
    }

    /// `to` runs only after `from` is done
    pub fn add_dependency(&self, from: &Job, to: &Job) -> Result<()> {
        self.inner.scheduler.add_dependency(from.id(), to.id())
    }

    /// Replace the handler list of each event named in `handlers`
    pub fn update_event_handlers(&self, handlers: EventHandlers) {
        self.inner.events.update_handlers(handlers);
    }

    pub fn subscribe(&self, name: EventName, handler: EventHandler) {
        self.inner.events.subscribe(name, handler);
    }

    pub fn stats(&self) -> Vec<JobStat> {
        self.inner.scheduler.snapshot_all()
    }

    /// Run every ready job and everything it unblocks.
    ///
    /// Returns the results of the terminus jobs reached, grouped by start
    /// job in creation order. The first failing branch fails the run; other
    /// branches already in flight keep running.
    pub async fn run(&self, payload: Value) -> Result<Vec<Value>> {
        let inner = self.inner.clone();
        let run_id = Uuid::new_v4();

        if inner.config.reject_cycles {
            if let Some(id) = inner.scheduler.find_cycle() {
                tracing::error!("Refusing to run {}: cycle through job {}", inner.config.name, id);
                return Err(FlowError::CyclicGraph(id));
            }
        }

        tracing::info!("Starting workflow {}: run_id={}", inner.config.name, run_id);
        let ctx = EventContext::Workflow(WorkflowContext::new(inner.config.name.clone(), payload.clone()));
        inner.events.dispatch(EventName::Start, &ctx)?;

        // Start jobs have no predecessors, so they all receive the run payload
        let branches: Vec<(Arc<Job>, Value)> = inner
            .scheduler
            .claim_ready_jobs()
            .into_iter()
            .map(|(job, _)| (job, payload.clone()))
            .collect();

        let results = match WorkflowInner::spawn_branches(&inner, branches).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Workflow execution failed: run_id={}, error={}", run_id, e);
                return Err(e);
            }
        };

        tracing::info!(
            "Workflow execution completed: run_id={}, {} result(s)",
            run_id,
            results.len()
        );
        let ctx = EventContext::Workflow(WorkflowContext {
            workflow_name: inner.config.name.clone(),
            payload,
            result: Value::Array(results.clone()),
        });
        inner.events.dispatch(EventName::Finish, &ctx)?;

        Ok(results)
    }
}

impl WorkflowInner {
    /// Run each job on its own task and concatenate their outputs in order
    async fn spawn_branches(this: &Arc<Self>, branches: Vec<(Arc<Job>, Value)>) -> Result<Vec<Value>> {
        let handles = branches.into_iter().map(|(job, payload)| {
            tokio::spawn(this.clone().run_job(job, payload)).map(|joined| {
                joined
                    .map_err(|e| FlowError::TaskJoin(e.to_string()))
                    .and_then(|branch| branch)
            })
        });

        let outputs = try_join_all(handles).await?;
        Ok(outputs.into_iter().flatten().collect())
    }

    fn run_job(self: Arc<Self>, job: Arc<Job>, payload: Value) -> BoxFuture<'static, Result<Vec<Value>>> {
        async move {
            self.scheduler.start_job(&job)?;
            tracing::info!("Starting job {} ({})", job.name(), job.id());

            let outcome = match self.execute_job(&job, payload).await {
                Ok(result) => self
                    .scheduler
                    .done_job(&job, result.clone())
                    .map(|ready| (result, ready)),
                Err(e) => Err(e),
            };
            let (result, ready) = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.scheduler.fail_job(&job);
                    tracing::error!("Job {} failed: {}", job.name(), e);
                    return Err(e);
                }
            };
            tracing::info!("Job {} completed", job.name());

            let ctx = EventContext::FinishJob(FinishJobContext {
                job: JobContext {
                    workflow: WorkflowContext {
                        workflow_name: self.config.name.clone(),
                        payload: job.payload().unwrap_or(Value::Null),
                        result: result.clone(),
                    },
                    job_name: job.name().to_string(),
                },
                stats: self.scheduler.snapshot_all(),
                next_jobs: ready.iter().map(|(next, _)| next.clone()).collect(),
            });
            self.events.dispatch(EventName::FinishJob, &ctx)?;

            if self.scheduler.is_terminus(job.id()) {
                return Ok(vec![result]);
            }
            if ready.is_empty() {
                return Ok(Vec::new());
            }

            let branches = ready
                .into_iter()
                .map(|(next, fan_in)| (next, Value::Array(fan_in)))
                .collect();
            Self::spawn_branches(&self, branches).await
        }
        .boxed()
    }

    async fn execute_job(&self, job: &Job, payload: Value) -> Result<Value> {
        let ctx = EventContext::Job(JobContext::new(
            self.config.name.clone(),
            job.name(),
            payload.clone(),
        ));
        self.events.dispatch(EventName::StartJob, &ctx)?;

        job.run(payload).await
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.inner.config.name)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler;
    use crate::executor::{step_fn, LocalExecutor, StepFunction};
    use crate::types::{FuncOverrides, JobState};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fanflow_core=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }

    fn create_workflow() -> Workflow {
        init_tracing();
        Workflow::with_config(EngineConfig::named("test"), Arc::new(LocalExecutor::new()))
    }

    /// Sum incoming counts (or take the single count) and add one
    fn count_up() -> StepFunction {
        step_fn(|event: Value| async move {
            let count = match &event {
                Value::Array(items) => items.iter().filter_map(|i| i["count"].as_i64()).sum::<i64>(),
                other => other["count"].as_i64().unwrap_or(0),
            };
            Ok(json!({ "count": count + 1 }))
        })
    }

    /// Sleep `ms` then report `ms` plus whatever the predecessors reported
    fn sleep_for(ms: u64) -> StepFunction {
        step_fn(move |event: Value| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let before: u64 = match &event {
                Value::Array(items) => items.iter().filter_map(Value::as_u64).sum(),
                _ => 0,
            };
            Ok(json!(before + ms))
        })
    }

    async fn counting_job(workflow: &Workflow) -> Arc<Job> {
        let job = workflow.new_job().unwrap();
        job.add_func(count_up(), FuncOverrides::new()).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_serial_jobs() {
        let workflow = create_workflow();
        let first = counting_job(&workflow).await;
        let second = counting_job(&workflow).await;
        workflow.add_dependency(&first, &second).unwrap();

        let results = workflow.run(json!({ "count": 0 })).await.unwrap();
        assert_eq!(results, vec![json!({ "count": 2 })]);
        assert_eq!(second.payload(), Some(json!([{ "count": 1 }])));
    }

    #[tokio::test]
    async fn test_parallel_jobs() {
        let workflow = create_workflow();
        counting_job(&workflow).await;
        counting_job(&workflow).await;

        let results = workflow.run(json!({ "count": 0 })).await.unwrap();
        assert_eq!(results, vec![json!({ "count": 1 }), json!({ "count": 1 })]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fourteen_job_dag() {
        let workflow = create_workflow();
        let mut jobs = Vec::new();
        for _ in 0..14 {
            jobs.push(counting_job(&workflow).await);
        }

        let edges = [
            (0, 1), (0, 2), (1, 3), (3, 5), (2, 4), (4, 5), (5, 7), (5, 6),
            (6, 9), (9, 12), (7, 10), (10, 12), (12, 13), (5, 8), (8, 11), (11, 13),
        ];
        for (from, to) in edges {
            workflow.add_dependency(&jobs[from], &jobs[to]).unwrap();
        }

        let results = workflow.run(json!({ "count": 0 })).await.unwrap();
        assert_eq!(results, vec![json!({ "count": 29 })]);

        let stats = workflow.stats();
        assert!(stats.iter().all(|s| s.state == JobState::Done));
        assert_eq!(stats.iter().filter(|s| s.is_terminus_job).count(), 1);
        assert_eq!(
            jobs[13].payload(),
            Some(json!([{ "count": 19 }, { "count": 9 }]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_jobs_run_concurrently() {
        let workflow = create_workflow();
        for ms in [10, 20] {
            let job = workflow.new_job().unwrap();
            job.add_func(sleep_for(ms), FuncOverrides::new()).await.unwrap();
        }

        let started = tokio::time::Instant::now();
        let results = workflow.run(json!({})).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(results, vec![json!(10), json!(20)]);
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependent_jobs_accumulate() {
        let workflow = create_workflow();
        let mut jobs = Vec::new();
        for ms in [10, 20] {
            let job = workflow.new_job().unwrap();
            job.add_func(sleep_for(ms), FuncOverrides::new()).await.unwrap();
            jobs.push(job);
        }
        workflow.add_dependency(&jobs[0], &jobs[1]).unwrap();

        let started = tokio::time::Instant::now();
        let results = workflow.run(json!({})).await.unwrap();

        assert_eq!(results, vec![json!(30)]);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let workflow = create_workflow();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in EventName::ALL {
            let log = log.clone();
            workflow.subscribe(
                name,
                handler(move |event, ctx| {
                    let label = match ctx.func_name().or(ctx.job_name()) {
                        Some(subject) => format!("{}:{}", event, subject),
                        None => event.to_string(),
                    };
                    log.lock().unwrap().push(label);
                    Ok(())
                }),
            );
        }

        let first = counting_job(&workflow).await;
        let second = counting_job(&workflow).await;
        workflow.add_dependency(&first, &second).unwrap();
        workflow.run(json!({ "count": 0 })).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "addNewJob:job0",
                "addFunc:job0-function0",
                "addNewJob:job1",
                "addFunc:job1-function0",
                "start",
                "startJob:job0",
                "startFunc:job0-function0",
                "finishFunc:job0-function0",
                "finishJob:job0",
                "startJob:job1",
                "startFunc:job1-function0",
                "finishFunc:job1-function0",
                "finishJob:job1",
                "finish",
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_job_context() {
        let workflow = create_workflow();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        workflow.subscribe(
            EventName::FinishJob,
            handler(move |_, ctx| {
                if let EventContext::FinishJob(finish) = ctx {
                    let own = finish
                        .stats
                        .iter()
                        .find(|s| s.name == finish.job.job_name)
                        .map(|s| s.state);
                    let next: Vec<String> =
                        finish.next_jobs.iter().map(|j| j.name().to_string()).collect();
                    sink.lock().unwrap().push((own, next, ctx.result().clone()));
                }
                Ok(())
            }),
        );

        let first = counting_job(&workflow).await;
        let second = counting_job(&workflow).await;
        workflow.add_dependency(&first, &second).unwrap();
        workflow.run(json!({ "count": 0 })).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, Some(JobState::Done));
        assert_eq!(seen[0].1, vec!["job1".to_string()]);
        assert_eq!(seen[0].2, json!({ "count": 1 }));
        assert!(seen[1].1.is_empty());
    }

    #[tokio::test]
    async fn test_failure_leaves_downstream_suspended() {
        let workflow = create_workflow();
        let failures = Arc::new(Mutex::new(0));
        let counter = failures.clone();
        workflow.subscribe(
            EventName::FailFunc,
            handler(move |_, _| {
                *counter.lock().unwrap() += 1;
                Ok(())
            }),
        );

        let first = workflow.new_job().unwrap();
        first
            .add_func(
                step_fn(|_| async { anyhow::bail!("upstream broke") }),
                FuncOverrides::new(),
            )
            .await
            .unwrap();
        let second = counting_job(&workflow).await;
        workflow.add_dependency(&first, &second).unwrap();

        let err = workflow.run(json!({ "count": 0 })).await.unwrap_err();
        assert!(err.is_invocation());
        assert!(err.to_string().contains("upstream broke"));
        assert_eq!(*failures.lock().unwrap(), 1);

        let scheduler = workflow.scheduler();
        assert_eq!(scheduler.job_state(first.id()).unwrap(), JobState::Failed);
        assert_eq!(scheduler.job_state(second.id()).unwrap(), JobState::Suspend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_branch_leaves_siblings_running() {
        let workflow = create_workflow();
        let broken = workflow.new_job().unwrap();
        broken
            .add_func(
                step_fn(|_| async { anyhow::bail!("fails at once") }),
                FuncOverrides::new(),
            )
            .await
            .unwrap();
        let slow = workflow.new_job().unwrap();
        slow.add_func(sleep_for(50), FuncOverrides::new()).await.unwrap();

        let err = workflow.run(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("fails at once"));
        assert_ne!(
            workflow.scheduler().job_state(slow.id()).unwrap(),
            JobState::Done
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            workflow.scheduler().job_state(slow.id()).unwrap(),
            JobState::Done
        );
        assert_eq!(workflow.scheduler().result_of(slow.id()), Some(json!(50)));
        assert_eq!(
            workflow.scheduler().job_state(broken.id()).unwrap(),
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn test_handler_error_fails_run() {
        let workflow = create_workflow();
        counting_job(&workflow).await;
        workflow.subscribe(
            EventName::StartJob,
            handler(|_, _| Err(anyhow::anyhow!("observer bug"))),
        );

        let err = workflow.run(json!({ "count": 0 })).await.unwrap_err();
        assert!(matches!(err, FlowError::EventHandler { event: "startJob", .. }));
    }

    #[tokio::test]
    async fn test_job_without_functions_cannot_complete() {
        let workflow = create_workflow();
        let empty = workflow.new_named_job("empty").unwrap();

        let err = workflow.run(json!({})).await.unwrap_err();
        assert!(matches!(err, FlowError::SchedulerInvariant(_)));
        assert_eq!(
            workflow.scheduler().job_state(empty.id()).unwrap(),
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn test_second_run_has_nothing_to_do() {
        let workflow = create_workflow();
        counting_job(&workflow).await;

        assert_eq!(workflow.run(json!({ "count": 0 })).await.unwrap().len(), 1);
        assert!(workflow.run(json!({ "count": 0 })).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_handling() {
        let workflow = create_workflow();
        let start = counting_job(&workflow).await;
        let a = counting_job(&workflow).await;
        let b = counting_job(&workflow).await;
        workflow.add_dependency(&start, &a).unwrap();
        workflow.add_dependency(&a, &b).unwrap();
        workflow.add_dependency(&b, &a).unwrap();

        // Without the check, the cyclic part simply never becomes ready
        let results = workflow.run(json!({ "count": 0 })).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(workflow.scheduler().suspended_jobs().len(), 2);

        let config = EngineConfig {
            reject_cycles: true,
            ..EngineConfig::default()
        };
        let strict = Workflow::with_config(config, Arc::new(LocalExecutor::new()));
        let x = counting_job(&strict).await;
        let y = counting_job(&strict).await;
        strict.add_dependency(&x, &y).unwrap();
        strict.add_dependency(&y, &x).unwrap();

        let err = strict.run(json!({})).await.unwrap_err();
        assert!(matches!(err, FlowError::CyclicGraph(_)));
    }

    #[tokio::test]
    async fn test_config_defaults_reach_functions() {
        init_tracing();
        let config = EngineConfig {
            defaults: FuncOverrides::new().result_path("$.result"),
            ..EngineConfig::named("defaults")
        };
        let workflow = Workflow::with_config(config, Arc::new(LocalExecutor::new()));
        let job = workflow.new_job().unwrap();
        job.add_func(count_up(), FuncOverrides::new()).await.unwrap();

        let results = workflow.run(json!({ "count": 0 })).await.unwrap();
        assert_eq!(results, vec![json!({ "count": 0, "result": { "count": 1 } })]);
        assert_eq!(workflow.name(), "defaults");
    }
}
