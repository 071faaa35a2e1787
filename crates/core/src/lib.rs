// Core engine for fanflow: DAG workflows of step pipelines with fan-out/fan-in

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod job;
pub mod path;
pub mod scheduler;
pub mod types;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{FlowError, Result};
pub use events::{handler, EventContext, EventHandler, EventHandlers, EventManager, EventName};
pub use executor::{step_fn, FunctionExecutor, LocalExecutor, MemoizingExecutor, StepFunction};
pub use graph::{Graph, GraphNode};
pub use job::Job;
pub use scheduler::Scheduler;
pub use types::*;
pub use workflow::Workflow;
