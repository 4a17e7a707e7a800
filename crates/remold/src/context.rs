//! Shared mutable state threaded through one `apply` call.

use serde_json::Value;

use crate::value::{Map, object_mut};

/// Metadata key under which `$def` installs function definitions.
pub(crate) const FUNCTIONS_KEY: &str = "__functions__";

/// The execution state one `apply` call threads through every stage,
/// middleware, and handler.
///
/// Fields mirror the wire-format namespaces:
///
/// * `source` — read-only input document (`_:` / bare pointers)
/// * `dest` — the document being built (`@:` pointers)
/// * `metadata` — engine-internal object: function registry, side-channel
///   data between stages and handlers
/// * `temp_read_only` — function parameters, loop variables, and error info
///   during `except` (`&:` pointers)
/// * `temp` — mutable scratch that never reaches the final output
///   (`!:` pointers)
///
/// The three side tables are objects by invariant; handlers address them
/// through the pointer processor rather than touching the fields directly.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Read-only input document. No handler mutates this.
    pub source: Value,
    /// The document being built.
    pub dest: Value,
    /// Engine-internal side-channel object.
    pub metadata: Value,
    /// Read-only bindings: function args, loop variables, error info.
    pub temp_read_only: Value,
    /// Mutable scratch space.
    pub temp: Value,
    /// Language-level execution stack (compact step reprs, innermost last).
    pub(crate) lang_stack: Vec<String>,
    /// Handler executions so far; checked against `max_operations`.
    pub(crate) op_count: usize,
    /// Current `$func` nesting depth.
    pub(crate) call_depth: usize,
    /// Current value-resolution nesting depth.
    pub(crate) value_depth: usize,
}

impl ExecutionContext {
    /// Creates a context over the given source and destination documents.
    #[must_use]
    pub fn new(source: Value, dest: Value) -> Self {
        Self {
            source,
            dest,
            metadata: Value::Object(Map::new()),
            temp_read_only: Value::Object(Map::new()),
            temp: Value::Object(Map::new()),
            lang_stack: Vec::new(),
            op_count: 0,
            call_depth: 0,
            value_depth: 0,
        }
    }

    /// Number of handler executions so far in this context.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.op_count
    }

    /// Binds `name` in `temp_read_only`, returning the previous binding so
    /// the caller can restore it with [`Self::restore_read_only`]. Used for
    /// loop variables, function parameters, and `except` error info — all of
    /// which scope to one handler invocation.
    pub(crate) fn bind_read_only(&mut self, name: &str, value: Value) -> Option<Value> {
        object_mut(&mut self.temp_read_only).insert(name.to_owned(), value)
    }

    /// Restores a binding saved by [`Self::bind_read_only`].
    pub(crate) fn restore_read_only(&mut self, name: &str, previous: Option<Value>) {
        let table = object_mut(&mut self.temp_read_only);
        match previous {
            Some(value) => {
                table.insert(name.to_owned(), value);
            }
            None => {
                table.shift_remove(name);
            }
        }
    }

    /// The function registry object in `metadata`, created on first use.
    pub(crate) fn functions_mut(&mut self) -> &mut Map {
        let meta = object_mut(&mut self.metadata);
        let entry = meta
            .entry(FUNCTIONS_KEY.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        object_mut(entry)
    }

    /// Looks up a function definition by name.
    pub(crate) fn function(&self, name: &str) -> Option<&Value> {
        self.metadata.get(FUNCTIONS_KEY)?.get(name)
    }
}
