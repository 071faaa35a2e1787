use crate::error::{FlowError, Result};
use crate::graph::{Graph, GraphNode};
use crate::job::Job;
use crate::types::{JobId, JobState, JobStat};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

/// A job that just became ready, with its fan-in input list
pub type ReadyJob = (Arc<Job>, Vec<Value>);

#[derive(Debug, Default)]
struct RunState {
    done: HashMap<JobId, Value>,
    processing: HashSet<JobId>,
    failed: HashSet<JobId>,
    launched: HashSet<JobId>,
}

impl RunState {
    fn state_of(&self, graph: &Graph<Arc<Job>>, id: JobId) -> JobState {
        if self.processing.contains(&id) {
            JobState::Processing
        } else if self.failed.contains(&id) {
            JobState::Failed
        } else if self.done.contains_key(&id) {
            JobState::Done
        } else if graph
            .incoming_ids(id)
            .iter()
            .all(|from| self.done.contains_key(from))
        {
            JobState::Ready
        } else {
            JobState::Suspend
        }
    }

    fn fan_in(&self, graph: &Graph<Arc<Job>>, id: JobId) -> Vec<Value> {
        graph
            .incoming_ids(id)
            .iter()
            .map(|from| self.done.get(from).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Tracks job completion over the workflow graph and decides what runs next.
///
/// All state transitions go through one mutex; a job is launched at most
/// once per scheduler.
#[derive(Debug, Default)]
pub struct Scheduler {
    graph: RwLock<Graph<Arc<Job>>>,
    state: Mutex<RunState>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a job with a freshly issued id and add it to the graph
    pub fn add_job_with<F>(&self, build: F) -> Result<Arc<Job>>
    where
        F: FnOnce(JobId) -> Job,
    {
        let mut graph = self.graph.write().unwrap_or_else(PoisonError::into_inner);
        let job = Arc::new(build(graph.next_id()));
        graph.add_node(job.clone())?;
        Ok(job)
    }

    pub fn add_job(&self, job: Arc<Job>) -> Result<()> {
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_node(job)
    }

    /// `to` will only run after `from` is done
    pub fn add_dependency(&self, from: JobId, to: JobId) -> Result<()> {
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_edge(from, to)
    }

    pub fn job(&self, id: JobId) -> Option<Arc<Job>> {
        self.graph().node(id).cloned()
    }

    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.graph().all_nodes().to_vec()
    }

    pub fn next_jobs(&self, id: JobId) -> Vec<Arc<Job>> {
        self.graph().outgoing(id).into_iter().cloned().collect()
    }

    pub fn previous_jobs(&self, id: JobId) -> Vec<Arc<Job>> {
        self.graph().incoming(id).into_iter().cloned().collect()
    }

    pub fn topological_order(&self) -> Vec<Arc<Job>> {
        self.graph().topological_order().into_iter().cloned().collect()
    }

    pub fn find_cycle(&self) -> Option<JobId> {
        self.graph().find_cycle()
    }

    pub fn is_start(&self, id: JobId) -> bool {
        self.graph().incoming_ids(id).is_empty()
    }

    pub fn is_terminus(&self, id: JobId) -> bool {
        self.graph().outgoing_ids(id).is_empty()
    }

    pub fn job_state(&self, id: JobId) -> Result<JobState> {
        let graph = self.graph();
        if !graph.contains(id) {
            return Err(FlowError::SchedulerInvariant(format!(
                "untracked job id {}",
                id
            )));
        }
        Ok(self.state().state_of(&graph, id))
    }

    /// Jobs currently ready, with their fan-in inputs
    pub fn ready_jobs(&self) -> Vec<ReadyJob> {
        let graph = self.graph();
        let state = self.state();
        graph
            .all_nodes()
            .iter()
            .filter(|job| state.state_of(&graph, job.id()) == JobState::Ready)
            .map(|job| (job.clone(), state.fan_in(&graph, job.id())))
            .collect()
    }

    pub fn suspended_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs_in(JobState::Suspend)
    }

    pub fn done_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs_in(JobState::Done)
    }

    pub fn failed_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs_in(JobState::Failed)
    }

    fn jobs_in(&self, wanted: JobState) -> Vec<Arc<Job>> {
        let graph = self.graph();
        let state = self.state();
        graph
            .all_nodes()
            .iter()
            .filter(|job| state.state_of(&graph, job.id()) == wanted)
            .cloned()
            .collect()
    }

    /// Result a finished job produced
    pub fn result_of(&self, id: JobId) -> Option<Value> {
        self.state().done.get(&id).cloned()
    }

    /// Reserve `job` for launching. Returns `false` if it was already claimed.
    pub fn claim(&self, job: &Job) -> Result<bool> {
        if !self.graph().contains(job.id()) {
            return Err(FlowError::SchedulerInvariant(format!(
                "untracked job id {}",
                job.id()
            )));
        }
        Ok(self.state().launched.insert(job.id()))
    }

    /// Claim every ready job that nobody has launched yet
    pub fn claim_ready_jobs(&self) -> Vec<ReadyJob> {
        let graph = self.graph();
        let mut state = self.state();
        let ready: Vec<ReadyJob> = graph
            .all_nodes()
            .iter()
            .filter(|job| {
                !state.launched.contains(&job.id())
                    && state.state_of(&graph, job.id()) == JobState::Ready
            })
            .map(|job| (job.clone(), state.fan_in(&graph, job.id())))
            .collect();

        for (job, _) in &ready {
            state.launched.insert(job.id());
        }
        ready
    }

    pub fn start_job(&self, job: &Job) -> Result<()> {
        let graph = self.graph();
        let mut state = self.state();

        if !state.launched.contains(&job.id()) {
            return Err(FlowError::SchedulerInvariant(format!(
                "job {} started without being claimed",
                job.name()
            )));
        }
        let current = state.state_of(&graph, job.id());
        if current != JobState::Ready {
            return Err(FlowError::SchedulerInvariant(format!(
                "job {} cannot start from state {:?}",
                job.name(),
                current
            )));
        }

        state.processing.insert(job.id());
        tracing::debug!("Job {} is processing", job.name());
        Ok(())
    }

    /// Record the result of `job` and claim the successors it unblocked.
    ///
    /// Each returned pair carries the successor's fan-in list, one entry per
    /// predecessor in edge insertion order.
    pub fn done_job(&self, job: &Job, result: Value) -> Result<Vec<ReadyJob>> {
        if job.environment().is_pending() {
            return Err(FlowError::SchedulerInvariant(format!(
                "job {} finished while its environment is still pending",
                job.name()
            )));
        }

        let graph = self.graph();
        let mut state = self.state();

        if state.done.contains_key(&job.id()) {
            return Err(FlowError::SchedulerInvariant(format!(
                "job {} is already done",
                job.name()
            )));
        }

        state.processing.remove(&job.id());
        state.done.insert(job.id(), result);

        let mut ready = Vec::new();
        for next in graph.outgoing(job.id()) {
            let id = next.id();
            if state.done.contains_key(&id) || state.launched.contains(&id) {
                continue;
            }
            if state.state_of(&graph, id) == JobState::Ready {
                state.launched.insert(id);
                ready.push((next.clone(), state.fan_in(&graph, id)));
            }
        }

        tracing::debug!(
            "Job {} done, {} successor(s) ready",
            job.name(),
            ready.len()
        );
        Ok(ready)
    }

    /// Mark `job` failed. Everything downstream stays suspended.
    pub fn fail_job(&self, job: &Job) {
        let mut state = self.state();
        state.processing.remove(&job.id());
        state.failed.insert(job.id());
        tracing::debug!("Job {} failed", job.name());
    }

    /// Snapshot of every job, in registration order
    pub fn snapshot_all(&self) -> Vec<JobStat> {
        let graph = self.graph();
        let state = self.state();
        graph
            .all_nodes()
            .iter()
            .map(|job| {
                job.snapshot(
                    state.state_of(&graph, job.id()),
                    graph.incoming_ids(job.id()).to_vec(),
                    graph.outgoing_ids(job.id()).to_vec(),
                )
            })
            .collect()
    }

    fn graph(&self) -> RwLockReadGuard<'_, Graph<Arc<Job>>> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
