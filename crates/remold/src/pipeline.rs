//! Step pipeline: stages → middlewares → action dispatch.
//!
//! A pipeline knows nothing about other pipelines and creates no contexts;
//! that is the engine's job. The main pipeline and the value pipeline are
//! the same type configured with different stages and registries — they
//! differ only in which execution entry point the engine calls
//! ([`Pipeline::run`] for operations, [`Pipeline::run_value`] for value
//! resolution).
//!
//! Per handler execution the pipeline increments the context's operation
//! counter (raising once the budget is exhausted), pushes a compact step
//! repr onto the language execution stack when tracing, annotates escaping
//! plain errors with that stack exactly once, and pops the frame on every
//! exit path.

use serde_json::Value;

use crate::{
    context::ExecutionContext,
    engine::{Action, Engine},
    error::{Error, LimitError},
    registry::{ActionRegistry, StageRegistry},
    signal::{Flow, Interrupt},
};

/// Per-step hook running after stage expansion but before dispatch.
/// Intended for validation, logging, and metrics — not for value
/// substitution (handlers do that themselves).
pub trait Middleware {
    /// Unique key, for debugging.
    fn name(&self) -> &'static str;
    /// Higher runs earlier; baseline 0.
    fn priority(&self) -> i32 {
        0
    }
    /// Transform (or validate) a single step before dispatch.
    fn process(&self, step: Value, ctx: &mut ExecutionContext) -> Result<Value, Error>;
}

/// Self-contained step processor.
pub struct Pipeline {
    pub(crate) stages: StageRegistry,
    pub(crate) registry: ActionRegistry<Action>,
    middlewares: Vec<Box<dyn Middleware>>,
    /// Track the language execution stack while running (main pipeline
    /// only; value resolution is far too hot for per-step reprs).
    pub(crate) track_execution: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("track_execution", &self.track_execution)
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline from its stage tree and action registry.
    #[must_use]
    pub fn new(
        stages: StageRegistry,
        registry: ActionRegistry<Action>,
        track_execution: bool,
    ) -> Self {
        Self {
            stages,
            registry,
            middlewares: Vec::new(),
            track_execution,
        }
    }

    /// Adds a per-step middleware, keeping descending priority order.
    pub fn register_middleware(&mut self, middleware: Box<dyn Middleware>) {
        let at = self
            .middlewares
            .partition_point(|existing| existing.priority() >= middleware.priority());
        self.middlewares.insert(at, middleware);
    }

    /// Runs the pipeline over a spec (a single step or a list of steps),
    /// mutating `ctx.dest` step by step.
    pub(crate) fn run(&self, engine: &Engine, spec: &Value, ctx: &mut ExecutionContext) -> Flow<()> {
        let steps: Vec<Value> = match spec {
            Value::Array(items) => items.clone(),
            single => vec![single.clone()],
        };
        let steps = self.stages.run_all(steps, ctx).map_err(Interrupt::from)?;

        for step in steps {
            let mut step = step;
            for middleware in &self.middlewares {
                step = middleware.process(step, ctx).map_err(Interrupt::from)?;
            }

            let actions = self.registry.resolve(&step);
            if actions.is_empty() {
                return Err(Error::unhandled_step(repr_step(&step, engine.trace_repr_max())).into());
            }
            for action in actions {
                self.bookkept(engine, ctx, &step, |engine, ctx| {
                    engine.execute_step_action(action, &step, ctx)
                })?;
            }
        }
        Ok(())
    }

    /// Resolves one value through the registry, chaining multiple matched
    /// handlers (each sees the previous one's output). Used by the engine's
    /// stabilisation loop.
    pub(crate) fn run_value(
        &self,
        engine: &Engine,
        value: &Value,
        ctx: &mut ExecutionContext,
    ) -> Flow<Value> {
        let actions = self.registry.resolve(value);
        if actions.is_empty() {
            return Err(Error::unhandled_step(repr_step(value, engine.trace_repr_max())).into());
        }
        let mut current = value.clone();
        for action in actions {
            let step = current.clone();
            current = self.bookkept(engine, ctx, &step, |engine, ctx| {
                engine.execute_value_action(action, &step, ctx)
            })?;
        }
        Ok(current)
    }

    /// Shared per-handler bookkeeping: operation counting, language-stack
    /// push/pop, one-time error annotation, and step tracing.
    fn bookkept<T>(
        &self,
        engine: &Engine,
        ctx: &mut ExecutionContext,
        step: &Value,
        execute: impl FnOnce(&Engine, &mut ExecutionContext) -> Flow<T>,
    ) -> Flow<T> {
        ctx.op_count += 1;
        let max_operations = engine.limits().max_operations;
        if ctx.op_count > max_operations {
            return Err(LimitError::Operations {
                limit: max_operations,
                count: ctx.op_count,
            }
            .into());
        }

        if !self.track_execution {
            return execute(engine, ctx);
        }

        let frame = repr_step(step, engine.trace_repr_max());
        tracing::debug!(depth = ctx.lang_stack.len(), step = %frame, "executing step");
        ctx.lang_stack.push(frame);

        let result = match execute(engine, ctx) {
            Err(Interrupt::Error(err)) => {
                // annotate once, while the failing frame is still on the stack
                Err(Interrupt::Error(Box::new(err.with_trace(&ctx.lang_stack))))
            }
            other => other,
        };
        ctx.lang_stack.pop();
        result
    }
}

/// Compact human-readable step representation for the language call stack.
///
/// Objects render key by key with large nested values elided (`[3 items]`,
/// `{...}`); everything truncates to `max_len` characters. `None` disables
/// truncation.
pub(crate) fn repr_step(step: &Value, max_len: Option<usize>) -> String {
    fn trunc(text: String, max_len: Option<usize>) -> String {
        match max_len {
            Some(max) if text.chars().count() > max => {
                let kept: String = text.chars().take(max.saturating_sub(3)).collect();
                format!("{kept}...")
            }
            _ => text,
        }
    }

    let Value::Object(entries) = step else {
        return trunc(crate::value::render(step), max_len);
    };
    let parts: Vec<String> = entries
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::Array(items) => format!("[{} items]", items.len()),
                Value::Object(_) => {
                    let full = crate::value::render(value);
                    if full.len() > 50 { "{...}".to_owned() } else { full }
                }
                other => crate::value::render(other),
            };
            format!("'{key}': {rendered}")
        })
        .collect();
    trunc(format!("{{{}}}", parts.join(", ")), max_len)
}
