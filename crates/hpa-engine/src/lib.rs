//! The pipeline engine: schedules sources and sinks around the
//! `hpa-core` data model using wavefront barriers instead of an explicit
//! DAG, and a thread-per-core worker model instead of an async runtime.

pub mod control;
pub mod dataclass;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod wavefront;

pub use dataclass::{Class, DataClass};
pub use error::Error;
pub use node::{NodeId, NodeRegistry, Sink, Source};
pub use pipeline::{Affinity, PipelineDriver};
pub use wavefront::WavefrontSet;
