//! Engine — top-level orchestrator and public entry point.
//!
//! The engine owns the resolver, the processor, the two pipelines (main and
//! value), any named pipelines, the unescape rules, the construct and caster
//! tables, the JMESPath runtime, and the resource budgets. It creates the
//! execution context for [`Engine::apply`], runs the value-pipeline
//! stabilisation loop for [`Engine::resolve_value`], and maps escaping
//! control-flow signals into stray-signal errors at the public boundary.

use std::{rc::Rc, sync::Arc};

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::{
    casters::{Caster, CasterFn, CasterMap, builtin_casters},
    context::ExecutionContext,
    error::{Error, LimitError, format_trace},
    handlers::{
        ConstructKind, OpKind, constructs, container, flow, function,
        template::{self, unescape as template_unescape},
    },
    jmes,
    pipeline::Pipeline,
    pointer::PointerResolver,
    processor::PointerProcessor,
    registry::{ActionNode, ActionRegistry, StepMatcher},
    resource::Limits,
    signal::{Flow, Interrupt},
    stages::default_shorthand_stages,
    value::{Map, normalize},
};

/// Signature for a user-registered value construct: `(engine, node, ctx)` →
/// value, where `node` is the whole construct object (so auxiliary keys
/// like `$default` stay readable).
pub type ConstructFn = Rc<dyn Fn(&Engine, &Map, &mut ExecutionContext) -> Result<Value, Error>>;

/// One entry in the construct table.
#[derive(Clone)]
pub(crate) enum ConstructHandler {
    Builtin(ConstructKind),
    Custom(ConstructFn),
}

impl std::fmt::Debug for ConstructHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin(kind) => write!(f, "ConstructHandler::Builtin({kind})"),
            Self::Custom(_) => f.write_str("ConstructHandler::Custom(..)"),
        }
    }
}

/// Handler tag resolved by the dispatch registries. Operations and
/// control-flow keys run in the main pipeline; the last four run in the
/// value pipeline. Custom pipelines compose these tags with their own
/// registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Op(OpKind),
    Def,
    Func,
    Raise,
    Break,
    Continue,
    Return,
    Special,
    Template,
    Container,
    Identity,
}

/// A single unescape pass applied after value stabilisation, in descending
/// priority. The sole builtin rule strips the template escape layer
/// (`$${` → `${`, `$$` → `$`).
#[derive(Debug, Clone)]
pub struct UnescapeRule {
    /// Human-readable label for debugging and deduplication.
    pub name: &'static str,
    /// Higher runs first; baseline 0.
    pub priority: i32,
    /// Must recurse into containers itself.
    pub unescape: fn(Value) -> Value,
}

/// Top-level orchestrator. Construct via [`Engine::builder`] (or
/// [`Engine::new`] for the defaults), then call [`Engine::apply`]:
///
/// ```
/// use remold::Engine;
/// use serde_json::json;
///
/// let engine = Engine::new();
/// let result = engine
///     .apply(
///         &json!({"/name": "/user/name"}),
///         &json!({"user": {"name": "Alice"}}),
///         &json!({}),
///     )
///     .unwrap();
/// assert_eq!(result, json!({"name": "Alice"}));
/// ```
pub struct Engine {
    resolver: PointerResolver,
    processor: PointerProcessor,
    main_pipeline: Pipeline,
    value_pipeline: Option<Pipeline>,
    pipelines: AHashMap<String, Pipeline>,
    unescape_rules: Vec<UnescapeRule>,
    limits: Limits,
    constructs: IndexMap<String, ConstructHandler>,
    casters: CasterMap,
    jmes: jmespath::Runtime,
    trace_repr_max: Option<usize>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("limits", &self.limits)
            .field("constructs", &self.constructs.len())
            .field("casters", &self.casters.len())
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with the default construct set, casters, and limits.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a customised engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    // -- public API ---------------------------------------------------------

    /// Executes a spec through the main pipeline.
    ///
    /// The source is normalised on entry; the destination is copied before
    /// processing and the result is a further copy, so neither caller
    /// document is ever mutated. A plain error escaping here is logged once
    /// with the language-level call stack and returned; escaping
    /// control-flow signals surface as stray-signal errors without logging.
    pub fn apply(&self, spec: &Value, source: &Value, dest: &Value) -> Result<Value, Error> {
        let mut ctx = ExecutionContext::new(normalize(source.clone()), dest.clone());
        self.apply_to_context(spec, &mut ctx)
    }

    /// Like [`Self::apply`], but runs against a pre-built context and
    /// mutates it in place. Functions defined by `$def` persist in the
    /// context across calls, which is the supported way to keep definitions
    /// alive over several applies.
    pub fn apply_to_context(&self, spec: &Value, ctx: &mut ExecutionContext) -> Result<Value, Error> {
        match self.main_pipeline.run(self, spec, ctx) {
            Ok(()) => Ok(ctx.dest.clone()),
            Err(interrupt) => {
                let is_signal = interrupt.signal_kind().is_some();
                let err = interrupt.into_boundary_error();
                if !is_signal && !err.trace().is_empty() {
                    tracing::error!(
                        "execution failed: {err}\nlanguage call stack (innermost last):\n{}",
                        format_trace(err.trace())
                    );
                }
                Err(err)
            }
        }
    }

    /// Resolves a value through the value pipeline to its stable form:
    /// constructs dispatched, templates expanded, containers descended, and
    /// the escape layer stripped once at the end.
    pub fn resolve_value(&self, value: &Value, ctx: &mut ExecutionContext) -> Result<Value, Error> {
        self.process_value(value, ctx)
            .map_err(Interrupt::into_boundary_error)
    }

    /// Runs a named pipeline against an isolated copy of the destination,
    /// returning the sub-run's result. The calling context's destination is
    /// never mutated; its language stack and metadata are shared so nested
    /// frames appear in the integrated trace.
    pub fn run_pipeline(
        &self,
        name: &str,
        spec: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, Error> {
        let Some(pipeline) = self.pipelines.get(name) else {
            return Err(Error::shape(format!("pipeline '{name}' is not registered")));
        };
        tracing::debug!(pipeline = name, depth = ctx.lang_stack.len(), "entering named pipeline");

        let saved = ctx.dest.clone();
        let run = pipeline.run(self, spec, ctx);
        let result = std::mem::replace(&mut ctx.dest, saved);
        match run {
            Ok(()) => Ok(result),
            Err(interrupt) => {
                let is_signal = interrupt.signal_kind().is_some();
                let err = interrupt.into_boundary_error();
                if !is_signal && !err.trace().is_empty() {
                    tracing::error!(
                        "pipeline '{name}' failed: {err}\nlanguage call stack (innermost last):\n{}",
                        format_trace(err.trace())
                    );
                }
                Err(err)
            }
        }
    }

    /// Registers a named pipeline, callable via [`Self::run_pipeline`].
    pub fn register_pipeline(&mut self, name: impl Into<String>, pipeline: Pipeline) {
        self.pipelines.insert(name.into(), pipeline);
    }

    /// The main pipeline, for middleware registration.
    pub fn main_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.main_pipeline
    }

    // -- internal execution -------------------------------------------------

    /// Runs a nested spec (single step or step list) through the main
    /// pipeline in the current context.
    pub(crate) fn run_steps(&self, spec: &Value, ctx: &mut ExecutionContext) -> Flow<()> {
        self.main_pipeline.run(self, spec, ctx)
    }

    /// Fixed-point value resolution with unescaping applied once at the
    /// end.
    pub(crate) fn process_value(&self, value: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
        let resolved = self.stabilise(value, ctx)?;
        Ok(self.apply_unescape(resolved))
    }

    /// Fixed-point value resolution with unescaping deferred — used by the
    /// recursive descent handler and pointer-expansion call sites so the
    /// escape layer is stripped only once, at the outermost resolution.
    pub(crate) fn process_value_raw(&self, value: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
        self.stabilise(value, ctx)
    }

    /// The stabilisation loop: feed the value through the value pipeline
    /// until output equals input, a raw-value signal stops the iteration,
    /// or the depth budget runs out (which catches oscillating cycles like
    /// `a → b → a` as well as growing reference cycles).
    fn stabilise(&self, value: &Value, ctx: &mut ExecutionContext) -> Flow<Value> {
        let Some(pipeline) = &self.value_pipeline else {
            return Ok(value.clone());
        };

        // nesting guard: container descent re-enters here per child, so an
        // adversarial value that grows on every rewrite would otherwise
        // recurse without bound
        if ctx.value_depth >= crate::resource::MAX_VALUE_NESTING {
            return Err(LimitError::ValueDepth {
                limit: crate::resource::MAX_VALUE_NESTING,
            }
            .into());
        }
        ctx.value_depth += 1;
        let result = self.stabilise_loop(pipeline, value, ctx);
        ctx.value_depth -= 1;
        result
    }

    fn stabilise_loop(
        &self,
        pipeline: &Pipeline,
        value: &Value,
        ctx: &mut ExecutionContext,
    ) -> Flow<Value> {
        let mut current = value.clone();
        for _ in 0..self.limits.value_max_depth {
            match pipeline.run_value(self, &current, ctx) {
                Ok(next) => {
                    if next == current {
                        return Ok(next);
                    }
                    tracing::trace!(from = %crate::pipeline::repr_step(&current, self.trace_repr_max), "value rewritten");
                    current = next;
                }
                Err(Interrupt::Raw(raw)) => return Ok(raw),
                Err(other) => return Err(other),
            }
        }
        Err(LimitError::ValueDepth {
            limit: self.limits.value_max_depth,
        }
        .into())
    }

    fn apply_unescape(&self, mut value: Value) -> Value {
        for rule in &self.unescape_rules {
            value = (rule.unescape)(value);
        }
        value
    }

    /// Executes one main-pipeline action against the context.
    pub(crate) fn execute_step_action(
        &self,
        action: Action,
        step: &Value,
        ctx: &mut ExecutionContext,
    ) -> Flow<()> {
        let object = step.as_object();
        match action {
            Action::Op(kind) => {
                let step = object.ok_or_else(|| Error::shape("operation step must be an object"))?;
                crate::handlers::ops::execute(self, kind, step, ctx)
            }
            Action::Def => {
                let step = object.ok_or_else(|| Error::shape("$def step must be an object"))?;
                function::define(step, ctx)
            }
            Action::Func => {
                let step = object.ok_or_else(|| Error::shape("$func step must be an object"))?;
                // in operation position the function's value becomes the dest
                ctx.dest = function::call(self, step, ctx)?;
                Ok(())
            }
            Action::Raise => {
                let step = object.ok_or_else(|| Error::shape("$raise step must be an object"))?;
                let payload = step
                    .get("$raise")
                    .ok_or_else(|| Error::shape("$raise step is missing its payload"))?;
                function::raise(self, payload, ctx).map(|_| ())
            }
            Action::Break => flow::break_(),
            Action::Continue => flow::continue_(),
            Action::Return => {
                let step = object.ok_or_else(|| Error::shape("$return step must be an object"))?;
                let payload = step.get("$return").cloned().unwrap_or(Value::Null);
                flow::return_(self, &payload, ctx)
            }
            _ => Err(Error::shape("value-pipeline handler resolved in an operation position").into()),
        }
    }

    /// Executes one value-pipeline action, producing the rewritten value.
    pub(crate) fn execute_value_action(
        &self,
        action: Action,
        value: &Value,
        ctx: &mut ExecutionContext,
    ) -> Flow<Value> {
        match action {
            Action::Special => {
                let node = value
                    .as_object()
                    .ok_or_else(|| Error::shape("construct node must be an object"))?;
                constructs::dispatch(self, node, ctx)
            }
            Action::Template => {
                let text = value
                    .as_str()
                    .ok_or_else(|| Error::shape("template step must be a string"))?;
                template::execute(self, text, ctx)
            }
            Action::Container => container::descend(self, value, ctx),
            Action::Identity => Ok(value.clone()),
            _ => Err(Error::shape("operation handler resolved in a value position").into()),
        }
    }

    // -- accessors ----------------------------------------------------------

    /// The pointer resolver.
    #[must_use]
    pub fn resolver(&self) -> &PointerResolver {
        &self.resolver
    }

    /// The prefix-aware pointer processor.
    #[must_use]
    pub fn processor(&self) -> &PointerProcessor {
        &self.processor
    }

    /// The configured resource budgets.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub(crate) fn constructs(&self) -> &IndexMap<String, ConstructHandler> {
        &self.constructs
    }

    /// The caster table shared by templates and `$cast`.
    #[must_use]
    pub fn casters(&self) -> &CasterMap {
        &self.casters
    }

    pub(crate) fn jmes_runtime(&self) -> &jmespath::Runtime {
        &self.jmes
    }

    pub(crate) fn trace_repr_max(&self) -> Option<usize> {
        self.trace_repr_max
    }
}

/// Assembles an [`Engine`]: the single place where every registry gets
/// wired.
pub struct EngineBuilder {
    limits: Limits,
    casters: CasterMap,
    custom_constructs: IndexMap<String, ConstructFn>,
    jmes: Option<jmespath::Runtime>,
    unescape_rules: Vec<UnescapeRule>,
    trace_repr_max: Option<usize>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// A builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: Limits::new(),
            casters: builtin_casters(),
            custom_constructs: IndexMap::new(),
            jmes: None,
            unescape_rules: vec![UnescapeRule {
                name: "template",
                priority: 0,
                unescape: template_unescape,
            }],
            trace_repr_max: Some(200),
        }
    }

    /// Replaces the resource budgets.
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Registers (or shadows) a caster usable from `${name:…}` templates
    /// and `$cast`.
    #[must_use]
    pub fn caster(mut self, name: impl Into<String>, cast: CasterFn) -> Self {
        self.casters.insert(name.into(), Caster::Custom(cast));
        self
    }

    /// Registers (or shadows) a value construct under its marker key.
    #[must_use]
    pub fn construct(mut self, marker: impl Into<String>, handler: ConstructFn) -> Self {
        self.custom_constructs.insert(marker.into(), handler);
        self
    }

    /// Replaces the JMESPath runtime used by `${? …}` templates.
    #[must_use]
    pub fn jmes_runtime(mut self, runtime: jmespath::Runtime) -> Self {
        self.jmes = Some(runtime);
        self
    }

    /// Adds a post-stabilisation unescape rule.
    #[must_use]
    pub fn unescape_rule(mut self, rule: UnescapeRule) -> Self {
        self.unescape_rules.push(rule);
        self
    }

    /// Sets the step-repr truncation length for traces and error frames
    /// (`None` disables truncation).
    #[must_use]
    pub fn trace_repr_max(mut self, max: Option<usize>) -> Self {
        self.trace_repr_max = max;
        self
    }

    /// Wires the registries and produces the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        let constructs = construct_table(self.custom_constructs);
        let marker_keys: crate::registry::MarkerKeys =
            Arc::new(constructs.keys().cloned().collect::<IndexSet<String>>());

        let mut unescape_rules = self.unescape_rules;
        unescape_rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

        Engine {
            resolver: PointerResolver::new(),
            processor: PointerProcessor::new(),
            main_pipeline: main_pipeline(),
            value_pipeline: Some(value_pipeline(&marker_keys)),
            pipelines: AHashMap::new(),
            unescape_rules,
            limits: self.limits,
            constructs,
            casters: self.casters,
            jmes: self.jmes.unwrap_or_else(jmes::default_runtime),
            trace_repr_max: self.trace_repr_max,
        }
    }
}

/// The builtin construct table in registration order — the order that
/// breaks ties when an object carries several marker keys. Custom
/// constructs append after the builtins (shadowing by key keeps the
/// original position).
fn construct_table(custom: IndexMap<String, ConstructFn>) -> IndexMap<String, ConstructHandler> {
    use ConstructKind as K;
    const ORDER: &[ConstructKind] = &[
        K::Ref,
        K::Eval,
        K::Raw,
        K::And,
        K::Or,
        K::Not,
        K::Gt,
        K::Gte,
        K::Lt,
        K::Lte,
        K::Eq,
        K::Ne,
        K::In,
        K::Exists,
        K::Add,
        K::Sub,
        K::Mul,
        K::Div,
        K::Pow,
        K::Mod,
        K::StrSplit,
        K::StrJoin,
        K::StrSlice,
        K::StrUpper,
        K::StrLower,
        K::StrStrip,
        K::StrLstrip,
        K::StrRstrip,
        K::StrReplace,
        K::StrContains,
        K::StrStartswith,
        K::StrEndswith,
        K::RegexMatch,
        K::RegexSearch,
        K::RegexFindall,
        K::RegexReplace,
        K::RegexGroups,
        K::Cast,
        K::Func,
        K::Raise,
    ];

    let mut table: IndexMap<String, ConstructHandler> = ORDER
        .iter()
        .map(|kind| (kind.to_string(), ConstructHandler::Builtin(*kind)))
        .collect();
    for (marker, handler) in custom {
        table.insert(marker, ConstructHandler::Custom(handler));
    }
    table
}

/// The main pipeline: shorthand stages, control-flow keys above the
/// operations, execution tracking on.
fn main_pipeline() -> Pipeline {
    use OpKind as Op;
    let mut registry = ActionRegistry::new();

    for (name, key, action) in [
        ("def", "$def", Action::Def),
        ("func", "$func", Action::Func),
        ("raise", "$raise", Action::Raise),
        ("break", "$break", Action::Break),
        ("continue", "$continue", Action::Continue),
        ("return", "$return", Action::Return),
    ] {
        registry.register(ActionNode::leaf(name, 20, StepMatcher::Key(key), action));
    }

    for (name, kind) in [
        ("set", Op::Set),
        ("copy", Op::Copy),
        ("copyD", Op::CopyDest),
        ("delete", Op::Delete),
        ("foreach", Op::Foreach),
        ("while", Op::While),
        ("if", Op::If),
        ("exec", Op::Exec),
        ("update", Op::Update),
        ("distinct", Op::Distinct),
        ("replace_root", Op::ReplaceRoot),
        ("assert", Op::Assert),
        ("assertD", Op::AssertDest),
        ("try", Op::Try),
    ] {
        registry.register(ActionNode::leaf(name, 10, StepMatcher::Op(name), Action::Op(kind)));
    }

    Pipeline::new(default_shorthand_stages(), registry, true)
}

/// The value pipeline: special constructs above templates above container
/// descent, with identity as the catch-all.
fn value_pipeline(marker_keys: &crate::registry::MarkerKeys) -> Pipeline {
    let mut registry = ActionRegistry::new();
    registry.register(ActionNode::leaf(
        "special",
        10,
        StepMatcher::AnyMarker(Arc::clone(marker_keys)),
        Action::Special,
    ));
    registry.register(ActionNode::leaf("template", 8, StepMatcher::Template, Action::Template));
    registry.register(ActionNode::leaf(
        "container",
        5,
        StepMatcher::Container(Arc::clone(marker_keys)),
        Action::Container,
    ));
    registry.register(ActionNode::leaf("identity", -999, StepMatcher::Always, Action::Identity));

    Pipeline::new(crate::registry::StageRegistry::new(), registry, false)
}
