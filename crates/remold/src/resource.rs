//! Resource budgets.
//!
//! Every cooperative bound the engine enforces lives here, with the same
//! defaults the wire format documents. All caps are checked *before*
//! computing a cap-violating result when the cost can be predicted (split
//! count, join length, replace length, string repetition), and *after each
//! accumulation step* when it cannot (`$add`/`$sub`).

use std::time::Duration;

/// Python-compatible regex flag bits accepted by `$regex_*` constructs.
///
/// The numeric values match the flag integers DSL programs pass on the wire
/// (`IGNORECASE = 2`, `MULTILINE = 8`, ...).
pub mod regex_flags {
    /// Case-insensitive matching.
    pub const IGNORECASE: u32 = 2;
    /// `^`/`$` match at line boundaries.
    pub const MULTILINE: u32 = 8;
    /// `.` matches newlines.
    pub const DOTALL: u32 = 16;
    /// Verbose patterns (whitespace and comments ignored).
    pub const VERBOSE: u32 = 64;
    /// ASCII-only character classes.
    pub const ASCII: u32 = 256;

    /// Default whitelist: the five flags above.
    pub const DEFAULT_ALLOWED: u32 = IGNORECASE | MULTILINE | DOTALL | VERBOSE | ASCII;
}

/// Maximum nesting depth of value resolution (a container handler
/// resolving a child that resolves a child, …).
///
/// Separate from the per-call stabilisation budget: nesting tracks how deep
/// resolution recurses into the data, and guards the native call stack
/// against adversarial values that grow on every rewrite. Lower in debug
/// mode, where stack frames are larger.
#[cfg(debug_assertions)]
pub(crate) const MAX_VALUE_NESTING: usize = 64;

/// Maximum nesting depth of value resolution (a container handler
/// resolving a child that resolves a child, …).
#[cfg(not(debug_assertions))]
pub(crate) const MAX_VALUE_NESTING: usize = 200;

/// Configuration for the engine's resource limits.
///
/// Construct with [`Limits::new`] for the documented defaults, then adjust
/// with the builder methods:
///
/// ```
/// use remold::Limits;
///
/// let limits = Limits::new().max_operations(10_000).value_max_depth(8);
/// assert_eq!(limits.max_operations, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Cumulative handler executions per `apply`. Guards runaway loops.
    pub max_operations: usize,
    /// Value-pipeline stabilisation iterations per `process_value` call.
    /// Guards oscillating or infinite template expansion.
    pub value_max_depth: usize,
    /// `$func` call-stack depth. Guards mutual recursion.
    pub max_function_recursion_depth: usize,
    /// Iterations of one `while` loop.
    pub max_loop_iterations: usize,
    /// Elements a `foreach` will accept, checked before any body runs.
    pub max_foreach_items: usize,
    /// Wall-clock budget per regex operation.
    pub regex_timeout: Duration,
    /// Whitelisted regex flag bits (see [`regex_flags`]).
    pub regex_allowed_flags: u32,
    /// Largest absolute base accepted by `$pow` (operands and
    /// intermediates).
    pub pow_max_base: f64,
    /// Largest absolute exponent accepted by `$pow`.
    pub pow_max_exponent: f64,
    /// Longest string `$mul` repetition may produce.
    pub mul_max_string_result: usize,
    /// Largest absolute numeric operand accepted by `$mul`.
    pub mul_max_operand: f64,
    /// Largest absolute numeric result of `$add`.
    pub add_max_number_result: f64,
    /// Longest string `$add` concatenation may produce.
    pub add_max_string_result: usize,
    /// Largest absolute numeric result of `$sub`.
    pub sub_max_number_result: f64,
    /// Most pieces `$str_split` may produce.
    pub str_max_split_results: usize,
    /// Longest string `$str_join` may produce.
    pub str_max_join_result: usize,
    /// Longest string `$str_replace` may produce.
    pub str_max_replace_result: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

impl Limits {
    /// Creates limits with the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_operations: 1_000_000,
            value_max_depth: 50,
            max_function_recursion_depth: 100,
            max_loop_iterations: 10_000,
            max_foreach_items: 100_000,
            regex_timeout: Duration::from_secs(2),
            regex_allowed_flags: regex_flags::DEFAULT_ALLOWED,
            pow_max_base: 1e6,
            pow_max_exponent: 1000.0,
            mul_max_string_result: 1_000_000,
            mul_max_operand: 1e9,
            add_max_number_result: 1e15,
            add_max_string_result: 100_000_000,
            sub_max_number_result: 1e15,
            str_max_split_results: 100_000,
            str_max_join_result: 10_000_000,
            str_max_replace_result: 10_000_000,
        }
    }

    /// Sets the operation budget per `apply`.
    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = limit;
        self
    }

    /// Sets the value-pipeline stabilisation cap.
    #[must_use]
    pub fn value_max_depth(mut self, limit: usize) -> Self {
        self.value_max_depth = limit;
        self
    }

    /// Sets the `$func` call-depth cap.
    #[must_use]
    pub fn max_function_recursion_depth(mut self, limit: usize) -> Self {
        self.max_function_recursion_depth = limit;
        self
    }

    /// Sets the `while` iteration cap.
    #[must_use]
    pub fn max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    /// Sets the `foreach` input-size cap.
    #[must_use]
    pub fn max_foreach_items(mut self, limit: usize) -> Self {
        self.max_foreach_items = limit;
        self
    }

    /// Sets the per-call regex budget.
    #[must_use]
    pub fn regex_timeout(mut self, limit: Duration) -> Self {
        self.regex_timeout = limit;
        self
    }

    /// Sets the regex flag whitelist (see [`regex_flags`]).
    #[must_use]
    pub fn regex_allowed_flags(mut self, mask: u32) -> Self {
        self.regex_allowed_flags = mask;
        self
    }

    /// Sets the `$pow` base and exponent caps.
    #[must_use]
    pub fn pow_limits(mut self, max_base: f64, max_exponent: f64) -> Self {
        self.pow_max_base = max_base;
        self.pow_max_exponent = max_exponent;
        self
    }

    /// Sets the `$mul` string-result and operand caps.
    #[must_use]
    pub fn mul_limits(mut self, max_string_result: usize, max_operand: f64) -> Self {
        self.mul_max_string_result = max_string_result;
        self.mul_max_operand = max_operand;
        self
    }

    /// Sets the `$add`/`$sub` accumulation caps.
    #[must_use]
    pub fn accumulation_limits(
        mut self,
        add_max_number: f64,
        add_max_string: usize,
        sub_max_number: f64,
    ) -> Self {
        self.add_max_number_result = add_max_number;
        self.add_max_string_result = add_max_string;
        self.sub_max_number_result = sub_max_number;
        self
    }

    /// Sets the `$str_*` result caps.
    #[must_use]
    pub fn string_limits(
        mut self,
        max_split_results: usize,
        max_join_result: usize,
        max_replace_result: usize,
    ) -> Self {
        self.str_max_split_results = max_split_results;
        self.str_max_join_result = max_join_result;
        self.str_max_replace_result = max_replace_result;
        self
    }
}
