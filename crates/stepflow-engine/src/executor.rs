//! The control-node execution walker.
//!
//! Drives a step list top to bottom, recursing through control nodes.
//! Suspension points sit before each child, after each runnable returns,
//! and at every loop-iteration boundary; at each one the walker checks
//! cancellation. A pause freezes the walk into a cursor tree; the resume
//! walker re-enters only the interrupted path.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use stepflow_protocols::{Requirement, RunContext, StepInput, StepOutput};

use crate::cancellation::CancellationManager;
use crate::cursor::{BranchCursor, ListCursor, NodeCursor, PendingPause};
use crate::error::WorkflowError;
use crate::events::WorkflowEvent;
use crate::metrics::{StepMetricRecord, WorkflowMetrics};
use crate::node::{Loop, Parallel, WorkflowNode};

/// Per-run state shared by every node during one walk segment.
pub(crate) struct EngineShared {
    pub run_id: String,
    pub cancellation: Arc<CancellationManager>,
    pub metrics: Arc<WorkflowMetrics>,
    step_records: Mutex<Vec<StepMetricRecord>>,
    events: Option<UnboundedSender<WorkflowEvent>>,
}

impl EngineShared {
    pub fn new(
        run_id: String,
        cancellation: Arc<CancellationManager>,
        metrics: Arc<WorkflowMetrics>,
        events: Option<UnboundedSender<WorkflowEvent>>,
    ) -> Self {
        Self {
            run_id,
            cancellation,
            metrics,
            step_records: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Abort the walk if the run has been flagged for cancellation.
    pub fn ensure_live(&self) -> Result<(), WorkflowError> {
        self.cancellation.raise_if_cancelled(&self.run_id)
    }

    /// Emit a lifecycle event, if a listener is attached.
    pub fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Record a per-step metric for the run result.
    pub fn record_step(&self, record: StepMetricRecord) {
        self.step_records.lock().push(record);
    }

    /// Drain the per-step records collected so far.
    pub fn take_step_records(&self) -> Vec<StepMetricRecord> {
        std::mem::take(&mut *self.step_records.lock())
    }
}

/// Outcome of executing one node.
pub(crate) enum Flow {
    /// The node completed with zero or more outputs.
    Done(Vec<StepOutput>),

    /// A nested step emitted the terminal stop signal; the run ends with
    /// this output.
    Stop(StepOutput),

    /// A nested step paused the run.
    Paused {
        pauses: Vec<PendingPause>,
        cursor: NodeCursor,
    },
}

/// Outcome of executing a step list.
#[derive(Debug)]
pub(crate) enum ListFlow {
    Done(Vec<StepOutput>),
    Stop(StepOutput),
    Paused {
        pauses: Vec<PendingPause>,
        list: ListCursor,
    },
}

/// Execute one node against an input.
pub(crate) fn execute_node<'a>(
    node: &'a WorkflowNode,
    input: StepInput,
    ctx: &'a mut RunContext,
    shared: &'a EngineShared,
) -> BoxFuture<'a, Result<Flow, WorkflowError>> {
    Box::pin(async move {
        match node {
            WorkflowNode::Step(step) => step.execute(&input, ctx, shared).await,
            WorkflowNode::Condition(cond) => {
                if !(cond.evaluator)(&input) {
                    debug!("Condition '{}' evaluated false, skipping", cond.name);
                    return Ok(Flow::Done(Vec::new()));
                }
                debug!("Condition '{}' evaluated true", cond.name);
                match execute_list(&cond.steps, input, ctx, shared).await? {
                    ListFlow::Done(outs) => Ok(Flow::Done(outs)),
                    ListFlow::Stop(out) => Ok(Flow::Stop(out)),
                    ListFlow::Paused { pauses, list } => Ok(Flow::Paused {
                        pauses,
                        cursor: NodeCursor::Condition { list },
                    }),
                }
            }
            WorkflowNode::Loop(node) => loop_from(node, 0, Vec::new(), input, ctx, shared).await,
            WorkflowNode::Router(node) => {
                let selected = (node.selector)(&input);
                if selected.is_empty() {
                    debug!("Router '{}' selected no steps", node.name);
                    return Ok(Flow::Done(Vec::new()));
                }
                debug!("Router '{}' selected {} step(s)", node.name, selected.len());
                match execute_list(&selected, input, ctx, shared).await? {
                    ListFlow::Done(outs) => Ok(Flow::Done(outs)),
                    ListFlow::Stop(out) => Ok(Flow::Stop(out)),
                    ListFlow::Paused { pauses, list } => Ok(Flow::Paused {
                        pauses,
                        cursor: NodeCursor::Router { selected, list },
                    }),
                }
            }
            WorkflowNode::Parallel(node) => execute_parallel(node, input, ctx, shared).await,
        }
    })
}

/// Execute a step list from the beginning.
pub(crate) async fn execute_list(
    steps: &[WorkflowNode],
    input: StepInput,
    ctx: &mut RunContext,
    shared: &EngineShared,
) -> Result<ListFlow, WorkflowError> {
    run_list_from(steps, 0, input, Vec::new(), ctx, shared).await
}

/// Execute a step list starting at `start`, with `outputs` already
/// produced by earlier children.
async fn run_list_from(
    steps: &[WorkflowNode],
    start: usize,
    mut current: StepInput,
    mut outputs: Vec<StepOutput>,
    ctx: &mut RunContext,
    shared: &EngineShared,
) -> Result<ListFlow, WorkflowError> {
    for (index, node) in steps.iter().enumerate().skip(start) {
        shared.ensure_live()?;

        match execute_node(node, current.clone(), ctx, shared).await? {
            Flow::Stop(out) => return Ok(ListFlow::Stop(out)),
            Flow::Paused { pauses, cursor } => {
                return Ok(ListFlow::Paused {
                    pauses,
                    list: ListCursor {
                        index,
                        outputs,
                        input: current,
                        child: Box::new(cursor),
                    },
                });
            }
            Flow::Done(outs) => {
                shared.ensure_live()?;

                if let Some(stop) = outs.iter().find(|o| o.stop) {
                    return Ok(ListFlow::Stop(stop.clone()));
                }
                if let Some(last) = outs.last() {
                    current = current.advance(last);
                }
                outputs.extend(outs);
            }
        }
    }
    Ok(ListFlow::Done(outputs))
}

/// Run loop iterations starting at `start`.
///
/// The iteration cap always wins, even when the end condition never
/// triggers.
async fn loop_from(
    node: &Loop,
    start: usize,
    mut collected: Vec<StepOutput>,
    mut current: StepInput,
    ctx: &mut RunContext,
    shared: &EngineShared,
) -> Result<Flow, WorkflowError> {
    for iteration in start..node.max_iterations {
        shared.ensure_live()?;
        debug!(
            "Loop '{}' iteration {}/{}",
            node.name,
            iteration + 1,
            node.max_iterations
        );

        match execute_list(&node.steps, current.clone(), ctx, shared).await? {
            ListFlow::Stop(out) => return Ok(Flow::Stop(out)),
            ListFlow::Paused { pauses, list } => {
                return Ok(Flow::Paused {
                    pauses,
                    cursor: NodeCursor::Loop {
                        iteration,
                        collected,
                        list,
                    },
                });
            }
            ListFlow::Done(outs) => {
                let finished = (node.end_condition)(&outs);
                if let Some(last) = outs.last() {
                    current = current.advance(last);
                }
                collected.extend(outs);
                if finished {
                    debug!("Loop '{}' end condition met", node.name);
                    break;
                }
            }
        }
    }
    Ok(Flow::Done(collected))
}

/// Per-branch outcome of a parallel fan-out, in declaration order.
enum BranchFlow {
    Failed(WorkflowError),
    Stop(StepOutput),
    Done(Vec<StepOutput>),
    Paused {
        pauses: Vec<PendingPause>,
        cursor: NodeCursor,
        ctx: RunContext,
    },
}

/// Execute all children of a parallel node concurrently.
///
/// Each branch gets its own context copy (scalar isolation, shared
/// session state). All children start together; the output list is
/// stable in declaration order.
async fn execute_parallel(
    node: &Parallel,
    input: StepInput,
    ctx: &mut RunContext,
    shared: &EngineShared,
) -> Result<Flow, WorkflowError> {
    shared.ensure_live()?;
    debug!(
        "Parallel '{}' fanning out {} branch(es)",
        node.name,
        node.steps.len()
    );

    let mut branch_ctxs: Vec<RunContext> =
        node.steps.iter().map(|_| ctx.branch_copy()).collect();

    let futures = node
        .steps
        .iter()
        .zip(branch_ctxs.iter_mut())
        .map(|(child, branch_ctx)| {
            let branch_input = input.clone();
            async move { execute_node(child, branch_input, branch_ctx, shared).await }
        });
    let results = join_all(futures).await;

    let branches = results
        .into_iter()
        .zip(branch_ctxs)
        .map(|(result, branch_ctx)| match result {
            Err(e) => BranchFlow::Failed(e),
            Ok(Flow::Stop(out)) => BranchFlow::Stop(out),
            Ok(Flow::Done(outs)) => BranchFlow::Done(outs),
            Ok(Flow::Paused { pauses, cursor }) => BranchFlow::Paused {
                pauses,
                cursor,
                ctx: branch_ctx,
            },
        })
        .collect();

    combine_branches(branches)
}

/// Merge per-branch outcomes into one node outcome.
///
/// Precedence: a branch error fails the run; otherwise the first stop
/// signal in declaration order terminates it (a simultaneous sibling
/// pause is discarded, so no approval record is ever written for it);
/// otherwise any pause freezes the node; otherwise the concatenated
/// outputs are returned.
fn combine_branches(branches: Vec<BranchFlow>) -> Result<Flow, WorkflowError> {
    let mut failure: Option<WorkflowError> = None;
    let mut stop: Option<StepOutput> = None;
    let mut pauses_all: Vec<PendingPause> = Vec::new();
    let mut cursors: Vec<BranchCursor> = Vec::new();
    let mut any_paused = false;

    for branch in branches {
        match branch {
            BranchFlow::Failed(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
                cursors.push(BranchCursor::Done(Vec::new()));
            }
            BranchFlow::Stop(out) => {
                if stop.is_none() {
                    stop = Some(out.clone());
                }
                cursors.push(BranchCursor::Done(vec![out]));
            }
            BranchFlow::Done(outs) => {
                // A bare step under the parallel node surfaces its stop
                // signal through its output rather than a Stop flow.
                if stop.is_none() {
                    if let Some(out) = outs.iter().find(|o| o.stop) {
                        stop = Some(out.clone());
                    }
                }
                cursors.push(BranchCursor::Done(outs));
            }
            BranchFlow::Paused {
                pauses,
                cursor,
                ctx,
            } => {
                any_paused = true;
                pauses_all.extend(pauses);
                cursors.push(BranchCursor::Paused {
                    cursor: Box::new(cursor),
                    ctx,
                });
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    if let Some(out) = stop {
        return Ok(Flow::Stop(out));
    }
    if any_paused {
        return Ok(Flow::Paused {
            pauses: pauses_all,
            cursor: NodeCursor::Parallel { branches: cursors },
        });
    }

    let outputs = cursors
        .into_iter()
        .flat_map(|branch| match branch {
            BranchCursor::Done(outs) => outs,
            BranchCursor::Paused { .. } => Vec::new(),
        })
        .collect();
    Ok(Flow::Done(outputs))
}

/// Resume one interrupted node from its cursor.
pub(crate) fn resume_node<'a>(
    node: &'a WorkflowNode,
    cursor: NodeCursor,
    resolved: &'a [Requirement],
    ctx: &'a mut RunContext,
    shared: &'a EngineShared,
) -> BoxFuture<'a, Result<Flow, WorkflowError>> {
    Box::pin(async move {
        match (node, cursor) {
            (WorkflowNode::Step(step), NodeCursor::Step { input }) => {
                step.resume(&input, resolved, ctx, shared).await
            }
            (WorkflowNode::Condition(cond), NodeCursor::Condition { list }) => {
                match resume_list(&cond.steps, list, resolved, ctx, shared).await? {
                    ListFlow::Done(outs) => Ok(Flow::Done(outs)),
                    ListFlow::Stop(out) => Ok(Flow::Stop(out)),
                    ListFlow::Paused { pauses, list } => Ok(Flow::Paused {
                        pauses,
                        cursor: NodeCursor::Condition { list },
                    }),
                }
            }
            (
                WorkflowNode::Loop(node),
                NodeCursor::Loop {
                    iteration,
                    mut collected,
                    list,
                },
            ) => {
                let base_input = list.input.clone();
                match resume_list(&node.steps, list, resolved, ctx, shared).await? {
                    ListFlow::Stop(out) => Ok(Flow::Stop(out)),
                    ListFlow::Paused { pauses, list } => Ok(Flow::Paused {
                        pauses,
                        cursor: NodeCursor::Loop {
                            iteration,
                            collected,
                            list,
                        },
                    }),
                    ListFlow::Done(outs) => {
                        let finished = (node.end_condition)(&outs);
                        let mut current = base_input;
                        if let Some(last) = outs.last() {
                            current = current.advance(last);
                        }
                        collected.extend(outs);
                        if finished || iteration + 1 >= node.max_iterations {
                            return Ok(Flow::Done(collected));
                        }
                        loop_from(node, iteration + 1, collected, current, ctx, shared).await
                    }
                }
            }
            (WorkflowNode::Router(_), NodeCursor::Router { selected, list }) => {
                let flow = resume_list(&selected, list, resolved, ctx, shared).await?;
                match flow {
                    ListFlow::Done(outs) => Ok(Flow::Done(outs)),
                    ListFlow::Stop(out) => Ok(Flow::Stop(out)),
                    ListFlow::Paused { pauses, list } => Ok(Flow::Paused {
                        pauses,
                        cursor: NodeCursor::Router { selected, list },
                    }),
                }
            }
            (WorkflowNode::Parallel(node), NodeCursor::Parallel { branches }) => {
                resume_parallel(node, branches, resolved, shared).await
            }
            (node, _) => Err(WorkflowError::CursorMismatch(node.name().to_string())),
        }
    })
}

/// Resume an interrupted step list, then continue the remaining
/// children; earlier children are replayed from the recorded outputs.
pub(crate) async fn resume_list(
    steps: &[WorkflowNode],
    list: ListCursor,
    resolved: &[Requirement],
    ctx: &mut RunContext,
    shared: &EngineShared,
) -> Result<ListFlow, WorkflowError> {
    let ListCursor {
        index,
        outputs,
        input,
        child,
    } = list;

    let Some(node) = steps.get(index) else {
        return Err(WorkflowError::CursorMismatch(format!(
            "list index {} out of bounds",
            index
        )));
    };

    shared.ensure_live()?;
    match resume_node(node, *child, resolved, ctx, shared).await? {
        Flow::Stop(out) => Ok(ListFlow::Stop(out)),
        Flow::Paused { pauses, cursor } => Ok(ListFlow::Paused {
            pauses,
            list: ListCursor {
                index,
                outputs,
                input,
                child: Box::new(cursor),
            },
        }),
        Flow::Done(outs) => {
            shared.ensure_live()?;

            if let Some(stop) = outs.iter().find(|o| o.stop) {
                return Ok(ListFlow::Stop(stop.clone()));
            }
            let mut current = input;
            if let Some(last) = outs.last() {
                current = current.advance(last);
            }
            let mut all = outputs;
            all.extend(outs);
            run_list_from(steps, index + 1, current, all, ctx, shared).await
        }
    }
}

/// Resume only the interrupted branches of a parallel node; completed
/// branches replay their recorded outputs.
async fn resume_parallel(
    node: &Parallel,
    branches: Vec<BranchCursor>,
    resolved: &[Requirement],
    shared: &EngineShared,
) -> Result<Flow, WorkflowError> {
    shared.ensure_live()?;

    let mut slots: Vec<Option<BranchFlow>> = Vec::with_capacity(branches.len());
    let mut pending: Vec<(usize, NodeCursor, RunContext)> = Vec::new();

    for (idx, branch) in branches.into_iter().enumerate() {
        match branch {
            BranchCursor::Done(outs) => slots.push(Some(BranchFlow::Done(outs))),
            BranchCursor::Paused { cursor, ctx } => {
                slots.push(None);
                pending.push((idx, *cursor, ctx));
            }
        }
    }

    let futures = pending.into_iter().map(|(idx, cursor, mut branch_ctx)| {
        let child = &node.steps[idx];
        async move {
            let flow = resume_node(child, cursor, resolved, &mut branch_ctx, shared).await;
            (idx, flow, branch_ctx)
        }
    });

    for (idx, flow, branch_ctx) in join_all(futures).await {
        let Some(slot) = slots.get_mut(idx) else {
            return Err(WorkflowError::CursorMismatch(format!(
                "parallel branch {} out of bounds",
                idx
            )));
        };
        *slot = Some(match flow {
            Err(e) => BranchFlow::Failed(e),
            Ok(Flow::Stop(out)) => BranchFlow::Stop(out),
            Ok(Flow::Done(outs)) => BranchFlow::Done(outs),
            Ok(Flow::Paused { pauses, cursor }) => BranchFlow::Paused {
                pauses,
                cursor,
                ctx: branch_ctx,
            },
        });
    }

    combine_branches(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Condition, Router};
    use crate::step::Step;

    fn shared() -> EngineShared {
        EngineShared::new(
            "run-test".to_string(),
            Arc::new(CancellationManager::new()),
            Arc::new(WorkflowMetrics::new()),
            None,
        )
    }

    fn append_step(name: &'static str) -> WorkflowNode {
        Step::function(name, move |input, _| {
            let prior = input.previous_content_text().unwrap_or("").to_string();
            Ok(StepOutput::new(name, format!("{}{}", prior, name)))
        })
        .into()
    }

    #[tokio::test]
    async fn test_sequence_chains_previous_content() {
        let steps = vec![append_step("a"), append_step("b"), append_step("c")];
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_list(&steps, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            ListFlow::Done(outs) => {
                assert_eq!(outs.len(), 3);
                assert_eq!(outs[2].content, serde_json::json!("abc"));
            }
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_stop_halts_sequence() {
        let steps = vec![
            append_step("a"),
            Step::function("gate", |_, _| Ok(StepOutput::new("gate", "halt").with_stop()))
                .into(),
            append_step("never"),
        ];
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_list(&steps, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            ListFlow::Stop(out) => assert_eq!(out.step_name, "gate"),
            _ => panic!("expected stop"),
        }
    }

    #[tokio::test]
    async fn test_condition_false_is_noop() {
        let steps = vec![
            append_step("a"),
            Condition::new("check", |_| false, vec![append_step("skipped")]).into(),
            append_step("b"),
        ];
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_list(&steps, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            ListFlow::Done(outs) => {
                assert_eq!(outs.len(), 2);
                // The skipped condition leaves the flowing input unchanged.
                assert_eq!(outs[1].content, serde_json::json!("ab"));
            }
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_condition_true_contributes_outputs() {
        let steps = vec![
            append_step("a"),
            Condition::new("check", |_| true, vec![append_step("x")]).into(),
            append_step("b"),
        ];
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_list(&steps, StepInput::new("in"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            ListFlow::Done(outs) => {
                assert_eq!(outs.len(), 3);
                assert_eq!(outs[2].content, serde_json::json!("axb"));
            }
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_loop_fuse_caps_iterations() {
        let node: WorkflowNode = Loop::new(
            "retry",
            vec![append_step("i")],
            |_| false, // never terminates on its own
            4,
        )
        .into();
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_node(&node, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            Flow::Done(outs) => assert_eq!(outs.len(), 4),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_loop_end_condition_breaks_early() {
        let node: WorkflowNode = Loop::new(
            "retry",
            vec![append_step("i")],
            |outs| outs.iter().any(|o| o.content_text() == Some("ii")),
            10,
        )
        .into();
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_node(&node, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            // Iteration 1 produces "i", iteration 2 produces "ii".
            Flow::Done(outs) => assert_eq!(outs.len(), 2),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_loop_stop_aborts_loop_and_run() {
        let node: WorkflowNode = Loop::new(
            "retry",
            vec![
                Step::function("bail", |_, _| Ok(StepOutput::new("bail", "x").with_stop()))
                    .into(),
            ],
            |_| false,
            10,
        )
        .into();
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_node(&node, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        assert!(matches!(flow, Flow::Stop(_)));
    }

    #[tokio::test]
    async fn test_router_executes_selected_steps() {
        let node: WorkflowNode = Router::new(
            "route",
            |input| {
                if input.input.as_str() == Some("short") {
                    vec![append_step("s")]
                } else {
                    vec![append_step("l"), append_step("l2")]
                }
            },
            vec![append_step("s"), append_step("l")],
        )
        .into();
        let shared = shared();

        let mut ctx = RunContext::new("run-test", "s");
        let flow = execute_node(&node, StepInput::new("short"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            Flow::Done(outs) => assert_eq!(outs.len(), 1),
            _ => panic!("expected completion"),
        }

        let mut ctx = RunContext::new("run-test", "s");
        let flow = execute_node(&node, StepInput::new("long"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            Flow::Done(outs) => assert_eq!(outs.len(), 2),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_router_empty_selection_is_noop() {
        let node: WorkflowNode = Router::new("route", |_| Vec::new(), Vec::new()).into();
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_node(&node, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            Flow::Done(outs) => assert!(outs.is_empty()),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_parallel_outputs_are_stable_in_declaration_order() {
        let node: WorkflowNode = Parallel::new(
            "fan",
            vec![append_step("a"), append_step("b"), append_step("c")],
        )
        .into();
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_node(&node, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            Flow::Done(outs) => {
                let names: Vec<&str> = outs.iter().map(|o| o.step_name.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_parallel_stop_terminates_run() {
        let node: WorkflowNode = Parallel::new(
            "fan",
            vec![
                append_step("a"),
                Step::function("bail", |_, _| Ok(StepOutput::new("bail", "x").with_stop()))
                    .into(),
            ],
        )
        .into();
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_node(&node, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            Flow::Stop(out) => assert_eq!(out.step_name, "bail"),
            _ => panic!("expected stop"),
        }
    }

    #[tokio::test]
    async fn test_parallel_branch_context_isolation() {
        // Each branch writes its own output_schema and reads it back; a
        // sibling's write must never be visible.
        let branch = |tag: &'static str| -> WorkflowNode {
            Step::function(tag, move |_, ctx| {
                ctx.output_schema = Some(serde_json::json!({ "branch": tag }));
                ctx.set_state(format!("wrote-{}", tag), true);
                let seen = ctx.output_schema.clone();
                Ok(StepOutput::new(tag, seen.unwrap_or_default()))
            })
            .into()
        };
        let node: WorkflowNode = Parallel::new("fan", vec![branch("a"), branch("b")]).into();
        let mut ctx = RunContext::new("run-test", "s");
        let shared = shared();

        let flow = execute_node(&node, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap();
        match flow {
            Flow::Done(outs) => {
                assert_eq!(outs[0].content, serde_json::json!({ "branch": "a" }));
                assert_eq!(outs[1].content, serde_json::json!({ "branch": "b" }));
            }
            _ => panic!("expected completion"),
        }

        // The root context never sees a branch's scalar write, while the
        // shared session state accumulated both branches' entries.
        assert!(ctx.output_schema.is_none());
        assert_eq!(ctx.get_state::<bool>("wrote-a"), Some(true));
        assert_eq!(ctx.get_state::<bool>("wrote-b"), Some(true));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_between_steps() {
        let manager = Arc::new(CancellationManager::new());
        manager.register_run("run-test");
        let shared = EngineShared::new(
            "run-test".to_string(),
            Arc::clone(&manager),
            Arc::new(WorkflowMetrics::new()),
            None,
        );

        let cancel = Arc::clone(&manager);
        let steps = vec![
            Step::function("first", move |_, _| {
                // Flag the run mid-step; the walker aborts at the next
                // suspension point instead of starting the second step.
                cancel.cancel_run("run-test");
                Ok(StepOutput::new("first", "done"))
            })
            .into(),
            append_step("never"),
        ];

        let mut ctx = RunContext::new("run-test", "s");
        let err = execute_list(&steps, StepInput::new("x"), &mut ctx, &shared)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled(_)));
    }
}
