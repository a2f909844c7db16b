//! Control nodes.
//!
//! Control nodes compose steps and other control nodes into a tree with
//! strict single ownership and no cycles. From the outside they are
//! structurally identical to a step: they accept a step input plus a run
//! context and yield step outputs.

use std::sync::Arc;

use serde_json::json;

use stepflow_protocols::{StepInput, StepOutput};

use crate::step::Step;

type Evaluator = dyn Fn(&StepInput) -> bool + Send + Sync;
type EndCondition = dyn Fn(&[StepOutput]) -> bool + Send + Sync;
type Selector = dyn Fn(&StepInput) -> Vec<WorkflowNode> + Send + Sync;

/// One node of the workflow tree.
#[derive(Debug, Clone)]
pub enum WorkflowNode {
    Step(Step),
    Condition(Condition),
    Loop(Loop),
    Router(Router),
    Parallel(Parallel),
}

impl WorkflowNode {
    /// Returns the node name.
    pub fn name(&self) -> &str {
        match self {
            WorkflowNode::Step(step) => step.name(),
            WorkflowNode::Condition(node) => &node.name,
            WorkflowNode::Loop(node) => &node.name,
            WorkflowNode::Router(node) => &node.name,
            WorkflowNode::Parallel(node) => &node.name,
        }
    }

    /// Introspection tree for the node, for display and serialization.
    pub fn describe(&self) -> serde_json::Value {
        match self {
            WorkflowNode::Step(step) => json!({
                "kind": "step",
                "name": step.name(),
                "executor": step.executor_kind(),
            }),
            WorkflowNode::Condition(node) => json!({
                "kind": "condition",
                "name": node.name,
                "steps": node.steps.iter().map(|s| s.describe()).collect::<Vec<_>>(),
            }),
            WorkflowNode::Loop(node) => json!({
                "kind": "loop",
                "name": node.name,
                "max_iterations": node.max_iterations,
                "steps": node.steps.iter().map(|s| s.describe()).collect::<Vec<_>>(),
            }),
            WorkflowNode::Router(node) => json!({
                "kind": "router",
                "name": node.name,
                "choices": node.choices.iter().map(|s| s.describe()).collect::<Vec<_>>(),
            }),
            WorkflowNode::Parallel(node) => json!({
                "kind": "parallel",
                "name": node.name,
                "steps": node.steps.iter().map(|s| s.describe()).collect::<Vec<_>>(),
            }),
        }
    }
}

impl From<Step> for WorkflowNode {
    fn from(step: Step) -> Self {
        WorkflowNode::Step(step)
    }
}

impl From<Condition> for WorkflowNode {
    fn from(node: Condition) -> Self {
        WorkflowNode::Condition(node)
    }
}

impl From<Loop> for WorkflowNode {
    fn from(node: Loop) -> Self {
        WorkflowNode::Loop(node)
    }
}

impl From<Router> for WorkflowNode {
    fn from(node: Router) -> Self {
        WorkflowNode::Router(node)
    }
}

impl From<Parallel> for WorkflowNode {
    fn from(node: Parallel) -> Self {
        WorkflowNode::Parallel(node)
    }
}

/// Executes its nested steps only when the evaluator returns true.
///
/// The evaluator runs once per visit. When it returns false the node is
/// a no-op and the surrounding sequence continues unchanged.
#[derive(Clone)]
pub struct Condition {
    pub name: String,
    pub(crate) evaluator: Arc<Evaluator>,
    pub steps: Vec<WorkflowNode>,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, evaluator: F, steps: Vec<WorkflowNode>) -> Self
    where
        F: Fn(&StepInput) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            evaluator: Arc::new(evaluator),
            steps,
        }
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Repeats its nested steps until the end condition is met or the
/// iteration cap is reached.
///
/// The cap always wins, even when the end condition never triggers; it
/// is the safety fuse against non-terminating evaluators.
#[derive(Clone)]
pub struct Loop {
    pub name: String,
    pub steps: Vec<WorkflowNode>,
    pub(crate) end_condition: Arc<EndCondition>,
    pub max_iterations: usize,
}

impl Loop {
    pub fn new<F>(
        name: impl Into<String>,
        steps: Vec<WorkflowNode>,
        end_condition: F,
        max_iterations: usize,
    ) -> Self
    where
        F: Fn(&[StepOutput]) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            steps,
            end_condition: Arc::new(end_condition),
            max_iterations,
        }
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

/// Executes exactly the steps its selector returns for this invocation.
///
/// `choices` lists the routes the selector may pick from; it is used for
/// introspection and serialization only, never for execution. An empty
/// selection is a no-op.
#[derive(Clone)]
pub struct Router {
    pub name: String,
    pub(crate) selector: Arc<Selector>,
    pub choices: Vec<WorkflowNode>,
}

impl Router {
    pub fn new<F>(name: impl Into<String>, selector: F, choices: Vec<WorkflowNode>) -> Self
    where
        F: Fn(&StepInput) -> Vec<WorkflowNode> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            selector: Arc::new(selector),
            choices,
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("choices", &self.choices.len())
            .finish()
    }
}

/// Executes all children concurrently against isolated context copies
/// and a shared input, joining before the sequence proceeds.
#[derive(Clone)]
pub struct Parallel {
    pub name: String,
    pub steps: Vec<WorkflowNode>,
}

impl Parallel {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowNode>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

impl std::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_step(name: &str) -> Step {
        Step::function(name, |_, _| Ok(StepOutput::new("noop", "ok")))
    }

    #[test]
    fn test_node_names() {
        let condition = Condition::new("check", |_| true, vec![noop_step("a").into()]);
        let looped = Loop::new("retry", vec![noop_step("b").into()], |_| true, 3);
        let router = Router::new("route", |_| Vec::new(), vec![noop_step("c").into()]);
        let parallel = Parallel::new("fan-out", vec![noop_step("d").into()]);

        assert_eq!(WorkflowNode::from(condition).name(), "check");
        assert_eq!(WorkflowNode::from(looped).name(), "retry");
        assert_eq!(WorkflowNode::from(router).name(), "route");
        assert_eq!(WorkflowNode::from(parallel).name(), "fan-out");
    }

    #[test]
    fn test_describe_tree() {
        let node: WorkflowNode = Condition::new(
            "check",
            |_| true,
            vec![
                noop_step("inner").into(),
                Parallel::new("fan", vec![noop_step("x").into()]).into(),
            ],
        )
        .into();

        let tree = node.describe();
        assert_eq!(tree["kind"], "condition");
        assert_eq!(tree["steps"][0]["kind"], "step");
        assert_eq!(tree["steps"][1]["kind"], "parallel");
    }

    #[test]
    fn test_router_choices_are_introspection_only() {
        let router = Router::new("route", |_| Vec::new(), vec![noop_step("a").into()]);
        let tree = WorkflowNode::from(router).describe();
        assert_eq!(tree["choices"][0]["name"], "a");
    }
}
