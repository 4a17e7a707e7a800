#![doc = include_str!("../../../README.md")]

mod casters;
mod context;
mod engine;
mod error;
mod handlers;
mod jmes;
mod pipeline;
mod pointer;
mod processor;
mod registry;
mod resource;
mod signal;
mod stages;
mod value;

pub use crate::{
    casters::{BuiltinCaster, Caster, CasterFn, CasterMap, builtin_casters},
    context::ExecutionContext,
    engine::{Action, ConstructFn, Engine, EngineBuilder, UnescapeRule},
    error::{Error, ErrorKind, LimitError, PointerError},
    handlers::{ConstructKind, OpKind},
    jmes::default_runtime as default_jmes_runtime,
    pipeline::{Middleware, Pipeline},
    pointer::{PointerResolver, PointerResult},
    processor::{Namespace, PointerProcessor, is_pointer_like, split_prefix, with_dest_default},
    registry::{
        ActionNode, ActionRegistry, MarkerKeys, StageMatcher, StageNode, StageProcessor,
        StageRegistry, StepMatcher,
    },
    resource::{Limits, regex_flags},
    signal::SignalKind,
    stages::{AssertShorthand, AssignShorthand, DeleteShorthand, default_shorthand_stages},
    value::{Map, is_truthy, normalize, render, type_name, value_eq},
};
