//! JMESPath integration for `${? …}` template expressions.
//!
//! The engine consumes the `jmespath` crate through a [`Runtime`] carrying
//! the builtin functions plus the two DSL extensions, `add(a, b)` and
//! `subtract(a, b)`. A custom runtime can be supplied at engine construction
//! to extend or replace the function set.

use std::rc::Rc;

use jmespath::{
    Context, ErrorReason, JmespathError, Rcvar, Runtime, Variable,
    functions::{ArgumentType, CustomFunction, Signature},
};
use serde_json::Value;

use crate::error::Error;

/// Builds the default runtime: builtin JMESPath functions plus `add` and
/// `subtract`.
#[must_use]
pub fn default_runtime() -> Runtime {
    let mut runtime = Runtime::new();
    runtime.register_builtin_functions();
    runtime.register_function("add", Box::new(arith_fn(|a, b| a + b)));
    runtime.register_function("subtract", Box::new(arith_fn(|a, b| a - b)));
    runtime
}

/// Two-number arithmetic function in the crate's custom-function shape.
fn arith_fn(op: fn(f64, f64) -> f64) -> CustomFunction {
    CustomFunction::new(
        Signature::new(vec![ArgumentType::Number, ArgumentType::Number], None),
        Box::new(move |args: &[Rcvar], ctx: &mut Context<'_>| {
            let (a, b) = (number_arg(args, 0, ctx)?, number_arg(args, 1, ctx)?);
            let result = op(a, b);
            serde_json::Number::from_f64(result)
                .map(|n| Rc::new(Variable::Number(n)))
                .ok_or_else(|| {
                    JmespathError::new(
                        ctx.expression,
                        0,
                        ErrorReason::Parse(format!("non-finite arithmetic result: {result}")),
                    )
                })
        }),
    )
}

fn number_arg(args: &[Rcvar], index: usize, ctx: &Context<'_>) -> Result<f64, JmespathError> {
    args.get(index).and_then(|arg| arg.as_number()).ok_or_else(|| {
        JmespathError::new(
            ctx.expression,
            0,
            ErrorReason::Parse(format!("argument {index} must be a number")),
        )
    })
}

/// Compiles and evaluates `expression` against a JSON document, converting
/// the result back into the engine's value model.
pub fn search(runtime: &Runtime, expression: &str, document: &Value) -> Result<Value, Error> {
    let compiled = runtime
        .compile(expression)
        .map_err(|err| Error::shape(format!("invalid JMESPath expression: {err}")))?;
    let result = compiled
        .search(document)
        .map_err(|err| Error::shape(format!("JMESPath evaluation failed: {err}")))?;
    serde_json::to_value(&*result)
        .map_err(|err| Error::shape(format!("JMESPath result not representable: {err}")))
}
