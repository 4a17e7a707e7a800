//! Concrete handler implementations, grouped by logical system.
//!
//! * [`template`] — `${…}` substitution and its unescape pass
//! * [`constructs`] — core value constructs (`$ref`, `$eval`, logical,
//!   comparison, arithmetic, `$cast`) and construct dispatch
//! * [`strings`] / [`regex`] — the `$str_*` and `$regex_*` families
//! * [`container`] — recursive descent into arrays and plain objects
//! * [`ops`] — every `op`-dispatched operation
//! * [`function`] — `$def`, `$func`, `$raise`
//! * [`flow`] — `$break`, `$continue`, `$return`

pub(crate) mod constructs;
pub(crate) mod container;
pub(crate) mod flow;
pub(crate) mod function;
pub(crate) mod ops;
pub(crate) mod regex;
pub(crate) mod strings;
pub(crate) mod template;

pub use constructs::ConstructKind;
pub use ops::OpKind;
