//! Frozen positions of paused runs.
//!
//! When a step reports a pause, the walk freezes into a cursor tree
//! mirroring the path from the workflow root to the interrupted step.
//! Continuation re-enters only that path; completed children replay from
//! the recorded outputs and are never re-executed.

use stepflow_protocols::{Requirement, RunContext, StepInput, StepOutput};

use crate::node::WorkflowNode;
use crate::step::ApprovalPolicy;

/// One pause raised by a step, with the approval policy that governs it.
#[derive(Debug, Clone)]
pub(crate) struct PendingPause {
    pub requirement: Requirement,
    pub policy: Option<ApprovalPolicy>,
}

/// Frozen position inside a single node.
#[derive(Debug, Clone)]
pub(crate) enum NodeCursor {
    /// The interrupted step itself, with the input it was invoked with.
    Step { input: StepInput },

    /// A condition whose nested list is interrupted. The evaluator
    /// already returned true before the pause and is not re-evaluated.
    Condition { list: ListCursor },

    /// A loop frozen mid-iteration.
    Loop {
        iteration: usize,
        collected: Vec<StepOutput>,
        list: ListCursor,
    },

    /// A router frozen inside the steps its selector returned. The
    /// selector is not re-invoked on continuation.
    Router {
        selected: Vec<WorkflowNode>,
        list: ListCursor,
    },

    /// A parallel node with at least one interrupted branch.
    Parallel { branches: Vec<BranchCursor> },
}

/// Frozen position inside a step list: the child at `index` is
/// interrupted, children before it completed with `outputs`.
#[derive(Debug, Clone)]
pub(crate) struct ListCursor {
    pub index: usize,
    pub outputs: Vec<StepOutput>,
    pub input: StepInput,
    pub child: Box<NodeCursor>,
}

/// State of one branch of an interrupted parallel node.
#[derive(Debug, Clone)]
pub(crate) enum BranchCursor {
    /// The branch finished before the pause; its outputs are replayed.
    Done(Vec<StepOutput>),

    /// The branch is interrupted; its isolated context is preserved so
    /// per-branch scalar fields survive the pause.
    Paused {
        cursor: Box<NodeCursor>,
        ctx: RunContext,
    },
}
