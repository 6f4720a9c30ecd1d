//! Calling-context tree, metric model, and accumulation engine for the
//! post-mortem profile-aggregation core.
//!
//! This crate owns every globally-uniqued entity (load modules, functions,
//! files, metrics, contexts, threads) and the concurrency-safe operations
//! that build and finalize them. It has no knowledge of source/sink
//! scheduling, wavefronts, or I/O — see `hpa-engine` for the pipeline
//! driver that calls into [`pipeline::Pipeline`] from worker threads, and
//! `hpa-db` for the on-disk writer that reads the finalized state back out.

pub mod accumulator;
pub mod atomic_f64;
pub mod context;
pub mod error;
pub mod id_tuple;
pub mod metric;
pub mod module;
pub mod perthread;
pub mod pipeline;
pub mod reconstruction;
pub mod scope;
pub mod stats;

pub use context::ContextId;
pub use error::{Error, ErrorKind};
pub use id_tuple::{IdTupleElement, IdTupleKind, ThreadId};
pub use metric::MetricId;
pub use module::LoadModuleId;
pub use pipeline::Pipeline;
