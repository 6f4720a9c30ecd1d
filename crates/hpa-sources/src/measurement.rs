//! Raw per-thread measurement reader.
//!
//! Walks a directory of serialized CCT fragments and metric tables — one
//! file per thread — replaying each into the shared pipeline via
//! `context_insert`/`value_add`/`ctx_timepoint_add`, in pre-order so every
//! frame's parent has already been inserted by the time the child frame is
//! read.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/metrics.bin       global metric table, read once
//! <root>/threads/*.thread  one file per thread, any file name
//! ```
//!
//! `metrics.bin`: `count:u32`, then per metric `name, description,
//! n_scopes:u8 [scope:u8...], visible:u8, n_partials:u32
//! [(accumulate:u8, combine:u8)...]`.
//!
//! `*.thread`: a [`ThreadId`](hpa_core::id_tuple::ThreadId), then
//! `n_frames:u32` frames `(parent:u32, relation:u8, scope_kind:u8,
//! scope_payload:[u8;12])` — `parent == u32::MAX` attaches directly under
//! the CCT root, and every frame's parent must already have been read
//! (pre-order, parent before child) — then `n_values:u32` values
//! `(frame:u32, metric_index:u32, value:f64)`, then `n_timepoints:u32`
//! timepoints `(nanos:u64, frame:u32)`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use hpa_core::metric::{AccumulateExpr, Combine, MetricId, MetricScope, MetricSettings};
use hpa_core::scope::{Relation, Scope};
use hpa_core::{ContextId, Pipeline};
use hpa_engine::{Class, DataClass, Source};

use crate::error::{self, Error};
use crate::io_util::*;

const NO_PARENT: u32 = u32::MAX;

fn relation_to_u8(r: Relation) -> u8 {
    match r {
        Relation::Subscope => 0,
        Relation::Call => 1,
        Relation::InlinedCall => 2,
        Relation::EnclosingLexical => 3,
    }
}

fn relation_from_u8(path: &Path, v: u8) -> Result<Relation, Error> {
    Ok(match v {
        0 => Relation::Subscope,
        1 => Relation::Call,
        2 => Relation::InlinedCall,
        3 => Relation::EnclosingLexical,
        other => {
            return Err(Error::Malformed {
                path: path.to_path_buf(),
                reason: format!("unknown relation byte {other}"),
            })
        }
    })
}

fn metric_scope_to_u8(s: MetricScope) -> u8 {
    s as u8
}

fn metric_scope_from_u8(path: &Path, v: u8) -> Result<MetricScope, Error> {
    Ok(match v {
        0 => MetricScope::Point,
        1 => MetricScope::Function,
        2 => MetricScope::LexAware,
        3 => MetricScope::Execution,
        other => {
            return Err(Error::Malformed {
                path: path.to_path_buf(),
                reason: format!("unknown metric scope byte {other}"),
            })
        }
    })
}

fn accumulate_from_u8(path: &Path, v: u8) -> Result<AccumulateExpr, Error> {
    Ok(match v {
        0 => AccumulateExpr::Identity,
        1 => AccumulateExpr::Square,
        2 => AccumulateExpr::Count,
        other => {
            return Err(Error::Malformed {
                path: path.to_path_buf(),
                reason: format!("unknown accumulate byte {other}"),
            })
        }
    })
}

fn combine_from_u8(path: &Path, v: u8) -> Result<Combine, Error> {
    Ok(match v {
        0 => Combine::Sum,
        1 => Combine::Min,
        2 => Combine::Max,
        other => {
            return Err(Error::Malformed {
                path: path.to_path_buf(),
                reason: format!("unknown combine byte {other}"),
            })
        }
    })
}

/// Encodes the metric table [`MeasurementSource`] reads, for tests and for
/// tools that produce raw measurement directories.
pub fn write_metrics_table(
    path: &Path,
    metrics: &[(&str, &str, &[MetricScope], bool, &[(AccumulateExpr, Combine)])],
) -> std::io::Result<()> {
    use std::io::Write as _;
    let mut w = std::io::BufWriter::new(File::create(path)?);
    w.write_all(&(metrics.len() as u32).to_le_bytes())?;
    for (name, description, scopes, visible, partials) in metrics {
        w.write_all(&(name.len() as u32).to_le_bytes())?;
        w.write_all(name.as_bytes())?;
        w.write_all(&(description.len() as u32).to_le_bytes())?;
        w.write_all(description.as_bytes())?;
        w.write_all(&[scopes.len() as u8])?;
        for s in *scopes {
            w.write_all(&[metric_scope_to_u8(*s)])?;
        }
        w.write_all(&[u8::from(*visible)])?;
        w.write_all(&(partials.len() as u32).to_le_bytes())?;
        for (a, c) in *partials {
            let a = match a {
                AccumulateExpr::Identity => 0u8,
                AccumulateExpr::Square => 1,
                AccumulateExpr::Count => 2,
            };
            let c = match c {
                Combine::Sum => 0u8,
                Combine::Min => 1,
                Combine::Max => 2,
            };
            w.write_all(&[a, c])?;
        }
    }
    Ok(())
}

/// Reads a raw per-process/per-thread measurement directory and replays it
/// into the shared pipeline.
pub struct MeasurementSource {
    root: PathBuf,
}

impl MeasurementSource {
    /// Creates a source rooted at `root` (a directory containing
    /// `metrics.bin` and a `threads/` subdirectory).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_metrics_table(&self, pipeline: &Pipeline) -> Result<Vec<MetricId>, Error> {
        let path = self.root.join("metrics.bin");
        let mut r = BufReader::new(File::open(&path).map_err(|e| error::io(&path, e))?);

        let count = read_u32(&mut r, &path)?;
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = read_string(&mut r, &path)?;
            let description = read_string(&mut r, &path)?;
            let n_scopes = read_u8(&mut r, &path)?;
            let mut scopes = Vec::with_capacity(n_scopes as usize);
            for _ in 0..n_scopes {
                scopes.push(metric_scope_from_u8(&path, read_u8(&mut r, &path)?)?);
            }
            let visible = read_u8(&mut r, &path)? != 0;
            let mid = pipeline.metric_add(MetricSettings {
                name,
                description,
                scopes,
                visible,
                order: None,
            });
            let n_partials = read_u32(&mut r, &path)?;
            let mut reg = pipeline.metrics().write();
            let metric = reg.get_mut(mid).expect("metric just registered");
            for _ in 0..n_partials {
                let accumulate = accumulate_from_u8(&path, read_u8(&mut r, &path)?)?;
                let combine = combine_from_u8(&path, read_u8(&mut r, &path)?)?;
                metric.add_partial(accumulate, combine);
            }
            drop(reg);
            ids.push(mid);
        }
        Ok(ids)
    }

    fn run_one_thread(&self, path: &Path, pipeline: &Pipeline, metrics: &[MetricId]) -> Result<(), Error> {
        let mut r = BufReader::new(File::open(path).map_err(|e| error::io(path, e))?);

        let thread_id = read_thread_id(&mut r, path)?;
        let (_id, mut temp) = pipeline.thread_add(thread_id);

        let n_frames = read_u32(&mut r, path)?;
        let mut frames = Vec::with_capacity(n_frames as usize);
        for _ in 0..n_frames {
            let parent = read_u32(&mut r, path)?;
            let relation = relation_from_u8(path, read_u8(&mut r, path)?)?;
            let kind = read_u8(&mut r, path)?;
            let mut payload = [0u8; 12];
            r.read_exact(&mut payload).map_err(|e| error::io(path, e))?;
            let scope = Scope::decode(kind, payload).ok_or_else(|| Error::Malformed {
                path: path.to_path_buf(),
                reason: format!("undecodable scope (kind {kind})"),
            })?;

            let parent_ctx = if parent == NO_PARENT {
                pipeline.root()
            } else {
                *frames.get(parent as usize).ok_or_else(|| Error::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("frame referenced undefined parent {parent}"),
                })?
            };
            frames.push(pipeline.context_insert(parent_ctx, relation, scope));
        }

        let n_values = read_u32(&mut r, path)?;
        for _ in 0..n_values {
            let frame = read_u32(&mut r, path)?;
            let metric_index = read_u32(&mut r, path)?;
            let value = read_f64(&mut r, path)?;
            let ctx = frame_context(path, &frames, frame)?;
            let mid = *metrics.get(metric_index as usize).ok_or(Error::UnknownMetric {
                path: path.to_path_buf(),
                index: metric_index,
            })?;
            pipeline.value_add(&mut temp, ctx, mid, value);
        }

        let n_timepoints = read_u32(&mut r, path)?;
        for _ in 0..n_timepoints {
            let nanos = read_u64(&mut r, path)?;
            let frame = read_u32(&mut r, path)?;
            let ctx = frame_context(path, &frames, frame)?;
            pipeline.ctx_timepoint_add(&mut temp, nanos, ctx);
        }

        pipeline.notify_thread_final(&mut temp)?;
        pipeline.thread_store(temp);
        Ok(())
    }
}

fn frame_context(path: &Path, frames: &[ContextId], frame: u32) -> Result<ContextId, Error> {
    frames.get(frame as usize).copied().ok_or_else(|| Error::Malformed {
        path: path.to_path_buf(),
        reason: format!("value referenced undefined frame {frame}"),
    })
}

impl Source for MeasurementSource {
    fn provides(&self) -> DataClass {
        DataClass::of(Class::Contexts)
            | DataClass::of(Class::Metrics)
            | DataClass::of(Class::Threads)
            | DataClass::of(Class::Timepoints)
            | DataClass::of(Class::CtxTimepoints)
    }

    fn run(&mut self, pipeline: &Pipeline) -> Result<(), hpa_core::Error> {
        (|| -> Result<(), Error> {
            let metrics = self.read_metrics_table(pipeline)?;

            let threads_dir = self.root.join("threads");
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&threads_dir)
                .map_err(|e| error::io(&threads_dir, e))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect();
            entries.sort();

            for path in entries {
                self.run_one_thread(&path, pipeline, &metrics)?;
            }
            Ok(())
        })()
        .map_err(Error::into_core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_thread_file(path: &Path, thread: &hpa_core::id_tuple::ThreadId) {
        let mut w = std::io::BufWriter::new(File::create(path).unwrap());
        write_thread_id(&mut w, path, thread).unwrap();
        // one frame, attached at root, Scope::Function(1), Relation::Call
        write_u32(&mut w, path, NO_PARENT).unwrap();
        write_u8(&mut w, path, relation_to_u8(Relation::Call)).unwrap();
        let (kind, payload) = Scope::Function(1).encode();
        write_u8(&mut w, path, kind).unwrap();
        w.write_all(&payload).unwrap();
        // 1 value at frame 0, metric 0
        write_u32(&mut w, path, 1).unwrap();
        write_u32(&mut w, path, 0).unwrap();
        write_u32(&mut w, path, 0).unwrap();
        write_f64(&mut w, path, 42.0).unwrap();
        // no timepoints
        write_u32(&mut w, path, 0).unwrap();
    }

    #[test]
    fn replays_one_thread_one_frame_one_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("threads")).unwrap();

        write_metrics_table(
            &dir.path().join("metrics.bin"),
            &[("cycles", "", &[MetricScope::Point, MetricScope::Execution], true, &[(
                AccumulateExpr::Identity,
                Combine::Sum,
            )])],
        )
        .unwrap();

        let thread = hpa_core::id_tuple::ThreadId::summary();
        write_thread_file(&dir.path().join("threads").join("0.thread"), &thread);

        let pipeline = Pipeline::new();
        let mut source = MeasurementSource::new(dir.path());
        source.run(&pipeline).unwrap();
        pipeline.finalize_identifiers();

        assert_eq!(pipeline.contexts().len(), 2);
        assert_eq!(pipeline.thread_count(), 1);
    }
}
