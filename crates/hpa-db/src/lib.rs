//! Sparse columnar database writer: `meta.db`, `profile.db`, `cct.db`,
//! `trace.db`, and `experiment.xml`.
//!
//! Every section writer takes a `&Pipeline` that has already run
//! `finalize_identifiers` and reads finalized per-thread buffers back out
//! via `Pipeline::with_finalized_threads`. [`sink::DatabaseSink`] wires all
//! five writers into one `hpa_engine::node::Sink` implementation.

pub mod cct;
pub mod error;
pub mod header;
mod io_util;
pub mod meta;
pub mod profile;
pub mod sink;
pub mod trace;
pub mod value_block;
pub mod xml;

pub use error::Error;
pub use sink::DatabaseSink;
