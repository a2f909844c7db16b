//! # Stepflow Engine
//!
//! Workflow/run orchestration: a directed pipeline of steps (agent,
//! team, or function calls) with sequential composition, conditional
//! branching, bounded loops, dynamic routing, and parallel fan-out. Any
//! step can pause the entire run pending human or external approval and
//! the run resumes exactly where it stopped.
//!
//! ## Key Components
//!
//! - [`Workflow`]: the root orchestrator and run control API
//! - [`Step`]: the atomic executable unit wrapping one runnable
//! - [`Condition`] / [`Loop`] / [`Router`] / [`Parallel`]: control nodes
//! - [`CancellationManager`]: process-wide cooperative cancellation
//! - [`WorkflowMetrics`]: aggregate and per-run counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use stepflow_engine::{Step, Workflow};
//! use stepflow_protocols::StepOutput;
//!
//! #[tokio::main]
//! async fn main() {
//!     let workflow = Workflow::builder("greet")
//!         .step(Step::function("greet", |input, _ctx| {
//!             Ok(StepOutput::new("greet", format!("hello {}", input.input)))
//!         }))
//!         .build();
//!
//!     let result = workflow.run("world").await.expect("run");
//!     println!("{:?}", result.content);
//! }
//! ```

pub mod cancellation;
pub mod config;
mod cursor;
pub mod error;
pub mod events;
mod executor;
pub mod metrics;
pub mod node;
pub mod step;
pub mod workflow;

pub use cancellation::CancellationManager;
pub use config::WorkflowConfig;
pub use error::WorkflowError;
pub use events::WorkflowEvent;
pub use metrics::{MetricsSnapshot, RunMetrics, StepMetricRecord, WorkflowMetrics};
pub use node::{Condition, Loop, Parallel, Router, WorkflowNode};
pub use step::{ApprovalPolicy, Step};
pub use workflow::{RunOptions, RunResult, Workflow, WorkflowBuilder};
