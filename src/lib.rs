#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
mod error;
pub mod executor;
pub mod fragment;
mod graph;
#[cfg(feature = "logging")]
pub mod logging;
pub mod resolve;
mod utils;

pub use crate::config::ExecutorConfig;
pub use crate::core::{
    ArcStr, ComputationTarget, Dynamic, ParameterizedFunction, ResolvedValue, ValueProperties,
    ValueRequirement, ValueSpecification,
};
pub use crate::error::*;
pub use crate::executor::{
    Dispatcher, ExecutionFuture, GraphExecutor, GraphResult, LocalDispatcher, StatisticsGatherer,
};
pub use crate::graph::{DependencyGraph, DependencyNode, FunctionCost, FunctionCosts};
