//! Streaming resolution of value requirements.
//!
//! * [`ResolutionProducer`]: memoizes candidate values for one requirement
//!   and hands them out to any number of consumers on demand.
//! * [`ResolutionFailure`]: mergeable record of why resolution failed.
//! * [`ProducerCache`]: owns producers by requirement and drops them once
//!   finished and unreferenced.

mod cache;
mod failure;
mod printer;
mod producer;

pub use crate::resolve::cache::ProducerCache;
pub use crate::resolve::failure::{
    FailureEvent, FunctionApplication, ResolutionFailure, ResolutionFailureVisitor,
};
pub use crate::resolve::printer::ResolutionFailurePrinter;
pub use crate::resolve::producer::{
    ResolutionProducer, ResolutionPump, ResolutionSource, ResolvedValueCallback,
};
