//! # Stepflow Protocols
//!
//! Data envelopes and capability traits shared across the Stepflow
//! orchestration engine.
//!
//! ## Components
//!
//! - [`StepInput`] / [`StepOutput`] - the envelope passed between steps
//! - [`RunContext`] - per-run mutable state threaded through every step
//! - [`Requirement`] - one unresolved human-in-the-loop pause condition
//! - [`Agent`] / [`Team`] / [`Executor`] - the runnable capability surface
//!
//! The engine itself lives in `stepflow-engine`; persistence traits live
//! in `stepflow-store`. This crate has no execution logic.

pub mod context;
pub mod error;
pub mod io;
pub mod requirement;
pub mod runnable;
pub mod types;

pub use context::RunContext;
pub use error::RunnableError;
pub use io::{MediaRef, StepInput, StepOutput};
pub use requirement::{PauseKind, Requirement, Resolution, ToolExecution};
pub use runnable::{Agent, ExecuteOutcome, Executor, FunctionRunnable, Team};
pub use types::{Metadata, RunStatus, StepMetrics};
