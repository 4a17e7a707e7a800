//! Tree-structured, priority-ordered dispatch registries.
//!
//! Two flavours with different semantics:
//!
//! * [`StageRegistry`] — *run-all*: every matching node executes, children
//!   before the node's own processor, in descending priority. Used for batch
//!   pre-processing of the step list (shorthand expansion).
//! * [`ActionRegistry`] — *selective*: walks descending priority collecting
//!   handler tags, honouring per-node exclusivity and the group-fallback
//!   rule. Used to pick the handler(s) for one step.

use std::sync::Arc;

use indexmap::IndexSet;
use serde_json::Value;
use smallvec::SmallVec;

use crate::{
    context::ExecutionContext, error::Error, handlers::template::has_unescaped_placeholder,
};

// ---------------------------------------------------------------------------
// Stage system — batch pre-processing
// ---------------------------------------------------------------------------

/// Predicate deciding whether a stage node fires. Nodes without a matcher
/// fire unconditionally.
pub trait StageMatcher {
    fn matches(&self, steps: &[Value], ctx: &ExecutionContext) -> bool;
}

/// Batch transformation of the full step list (shorthand expansion, step
/// validation, rewriting).
pub trait StageProcessor {
    /// Returns the (possibly transformed) step list.
    fn apply(&self, steps: Vec<Value>, ctx: &mut ExecutionContext) -> Result<Vec<Value>, Error>;
}

/// Single node in the stage tree.
///
/// Field combinations:
///
/// * processor, no children — leaf: just run this processor
/// * no processor, children — group container (no own logic)
/// * processor and children — children run first, then this processor
pub struct StageNode {
    pub name: &'static str,
    pub priority: i32,
    pub matcher: Option<Box<dyn StageMatcher>>,
    pub processor: Option<Box<dyn StageProcessor>>,
    pub children: Option<StageRegistry>,
}

impl std::fmt::Debug for StageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageNode")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Tree-structured registry with run-all dispatch semantics.
#[derive(Debug, Default)]
pub struct StageRegistry {
    nodes: Vec<StageNode>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node at this registry level, keeping descending priority
    /// order (stable for equal priorities).
    pub fn register(&mut self, node: StageNode) {
        let at = self
            .nodes
            .partition_point(|existing| existing.priority >= node.priority);
        self.nodes.insert(at, node);
    }

    /// Executes all matching processors in priority-descending order,
    /// recursing into children before each node's own processor. Every
    /// matching node executes — there is no short-circuit.
    pub fn run_all(
        &self,
        mut steps: Vec<Value>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Value>, Error> {
        for node in &self.nodes {
            let fires = node
                .matcher
                .as_ref()
                .is_none_or(|matcher| matcher.matches(&steps, ctx));
            if !fires {
                continue;
            }
            if let Some(children) = &node.children {
                steps = children.run_all(steps, ctx)?;
            }
            if let Some(processor) = &node.processor {
                steps = processor.apply(steps, ctx)?;
            }
        }
        Ok(steps)
    }

    /// Nodes in dispatch (descending-priority) order.
    #[must_use]
    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }
}

// ---------------------------------------------------------------------------
// Action system — per-step handler selection
// ---------------------------------------------------------------------------

/// Shared, immutable set of marker keys known to the value pipeline.
pub type MarkerKeys = Arc<IndexSet<String>>;

/// Predicate deciding whether a step belongs to an action node.
#[derive(Debug, Clone)]
pub enum StepMatcher {
    /// `step["op"] == name`.
    Op(&'static str),
    /// Object containing the given key.
    Key(&'static str),
    /// Object carrying at least one registered marker key.
    AnyMarker(MarkerKeys),
    /// Array, or object carrying none of the marker keys.
    Container(MarkerKeys),
    /// String with at least one unescaped `${…}` placeholder.
    Template,
    /// Unconditional match — catch-all / fallback sentinel.
    Always,
}

impl StepMatcher {
    /// Does `step` belong to the node carrying this matcher?
    #[must_use]
    pub fn matches(&self, step: &Value) -> bool {
        match self {
            Self::Op(name) => step.get("op").and_then(Value::as_str) == Some(name),
            Self::Key(key) => step.as_object().is_some_and(|map| map.contains_key(*key)),
            Self::AnyMarker(keys) => step
                .as_object()
                .is_some_and(|map| map.keys().any(|k| keys.contains(k.as_str()))),
            Self::Container(keys) => match step {
                Value::Array(_) => true,
                Value::Object(map) => !map.keys().any(|k| keys.contains(k.as_str())),
                _ => false,
            },
            Self::Template => step
                .as_str()
                .is_some_and(has_unescaped_placeholder),
            Self::Always => true,
        }
    }
}

/// Node in the action tree, tagged with a handler of type `T`.
///
/// Field combinations:
///
/// * handler, no children — leaf action
/// * no handler, children — group (no fallback)
/// * handler and children — group with fallback handler
///
/// `exclusive` controls resolution after this node: `true` (default) stops
/// collecting once the node yields at least one handler; `false` keeps
/// walking so later matches also execute.
#[derive(Debug)]
pub struct ActionNode<T> {
    pub name: &'static str,
    pub priority: i32,
    pub matcher: StepMatcher,
    pub handler: Option<T>,
    pub children: Option<ActionRegistry<T>>,
    pub exclusive: bool,
}

impl<T> ActionNode<T> {
    /// Leaf node with the default exclusive behaviour.
    #[must_use]
    pub fn leaf(name: &'static str, priority: i32, matcher: StepMatcher, handler: T) -> Self {
        Self {
            name,
            priority,
            matcher,
            handler: Some(handler),
            children: None,
            exclusive: true,
        }
    }
}

/// Hierarchical registry with *select* ([`Self::resolve`]) and *run-all*
/// ([`Self::resolve_all`]) dispatch modes. Each instance is one level of the
/// tree and may be nested as the `children` of an [`ActionNode`].
#[derive(Debug)]
pub struct ActionRegistry<T> {
    nodes: Vec<ActionNode<T>>,
}

impl<T> Default for ActionRegistry<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T: Clone> ActionRegistry<T> {
    /// Creates an empty registry level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, keeping descending priority order (stable for equal
    /// priorities).
    pub fn register(&mut self, node: ActionNode<T>) {
        let at = self
            .nodes
            .partition_point(|existing| existing.priority >= node.priority);
        self.nodes.insert(at, node);
    }

    /// Selects handlers for `step` using the exclusive / group-fallback
    /// rules. Returns an ordered list (possibly empty — the pipeline raises
    /// on empty).
    ///
    /// Group-fallback: when a node's children resolve at least one handler,
    /// those are taken and the node's own handler is skipped; the node's
    /// handler fires only when its children matched nothing.
    #[must_use]
    pub fn resolve(&self, step: &Value) -> SmallVec<[T; 2]> {
        let mut handlers: SmallVec<[T; 2]> = SmallVec::new();
        for node in &self.nodes {
            if !node.matcher.matches(step) {
                continue;
            }
            let mut node_resolved = false;
            if let Some(children) = &node.children {
                let sub = children.resolve(step);
                if !sub.is_empty() {
                    handlers.extend(sub);
                    node_resolved = true;
                }
            }
            if !node_resolved && let Some(handler) = &node.handler {
                handlers.push(handler.clone());
            }
            if node.exclusive && !handlers.is_empty() {
                break;
            }
        }
        handlers
    }

    /// Collects **all** matching handlers in priority order, ignoring
    /// `exclusive` — the middleware-style fan-out mode.
    #[must_use]
    pub fn resolve_all(&self, step: &Value) -> SmallVec<[T; 2]> {
        let mut handlers: SmallVec<[T; 2]> = SmallVec::new();
        for node in &self.nodes {
            if !node.matcher.matches(step) {
                continue;
            }
            if let Some(children) = &node.children {
                handlers.extend(children.resolve_all(step));
            }
            if let Some(handler) = &node.handler {
                handlers.push(handler.clone());
            }
        }
        handlers
    }

    /// Nodes in dispatch (descending-priority) order.
    #[must_use]
    pub fn nodes(&self) -> &[ActionNode<T>] {
        &self.nodes
    }
}
