//! `meta.db`: the non-sparse schema shared by every other file — modules,
//! files, functions, metrics, and the calling-context tree itself.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use hpa_core::metric::{AccumulateExpr, Combine, FinalizeExpr, MetricScope};
use hpa_core::scope::{Relation, Scope};
use hpa_core::{ContextId, Pipeline};

use crate::error::{self, Error};
use crate::header::{self, META_DB};
use crate::io_util::*;

/// A parsed `meta.db`, used by round-trip tests and the `merge` sparse
/// reader.
#[derive(Debug, Default)]
pub struct MetaDb {
    /// `(path, content_hash)` per load module, in assignment order.
    pub modules: Vec<(String, [u8; 32])>,
    /// File paths, in assignment order (index is the file id).
    pub files: Vec<String>,
    /// `(name, file_id)` per function, in assignment order.
    pub functions: Vec<(String, Option<u32>)>,
    /// `(name, base_index, n_partials)` per metric, in assignment order.
    pub metrics: Vec<MetaMetric>,
    /// `(final_id, parent_final_id, relation, scope)` per context.
    pub contexts: Vec<MetaContext>,
}

/// One metric's on-disk metadata.
#[derive(Debug, Clone)]
pub struct MetaMetric {
    /// Metric name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Identifier-table base index.
    pub base_index: u32,
    /// Scopes this metric is materialized under.
    pub scopes: Vec<MetricScope>,
    /// Whether the metric is shown by default.
    pub visible: bool,
    /// `(accumulate, combine)` per statistic partial, in registration
    /// order. A re-reader (the `merge` sparse source) re-registers these
    /// verbatim rather than re-deriving them.
    pub partials: Vec<(AccumulateExpr, Combine)>,
}

/// One context's on-disk record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaContext {
    /// Finalized identifier.
    pub id: u32,
    /// Finalized identifier of the parent, or `None` for the root.
    pub parent: Option<u32>,
    /// Relation to the parent.
    pub relation: Relation,
    /// This context's scope.
    pub scope: Scope,
}

fn relation_to_u8(r: Relation) -> u8 {
    match r {
        Relation::Subscope => 0,
        Relation::Call => 1,
        Relation::InlinedCall => 2,
        Relation::EnclosingLexical => 3,
    }
}

fn relation_from_u8(v: u8) -> Option<Relation> {
    Some(match v {
        0 => Relation::Subscope,
        1 => Relation::Call,
        2 => Relation::InlinedCall,
        3 => Relation::EnclosingLexical,
        _ => return None,
    })
}

fn metric_scope_to_u8(s: MetricScope) -> u8 {
    s as u8
}

fn metric_scope_from_u8(v: u8) -> Option<MetricScope> {
    Some(match v {
        0 => MetricScope::Point,
        1 => MetricScope::Function,
        2 => MetricScope::LexAware,
        3 => MetricScope::Execution,
        _ => return None,
    })
}

fn accumulate_to_u8(a: AccumulateExpr) -> u8 {
    match a {
        AccumulateExpr::Identity => 0,
        AccumulateExpr::Square => 1,
        AccumulateExpr::Count => 2,
    }
}

fn accumulate_from_u8(v: u8) -> Option<AccumulateExpr> {
    Some(match v {
        0 => AccumulateExpr::Identity,
        1 => AccumulateExpr::Square,
        2 => AccumulateExpr::Count,
        _ => return None,
    })
}

fn combine_to_u8(c: Combine) -> u8 {
    match c {
        Combine::Sum => 0,
        Combine::Min => 1,
        Combine::Max => 2,
    }
}

fn combine_from_u8(v: u8) -> Option<Combine> {
    Some(match v {
        0 => Combine::Sum,
        1 => Combine::Min,
        2 => Combine::Max,
        _ => return None,
    })
}

fn finalize_kind_and_args(f: &FinalizeExpr) -> (u8, [u32; 3]) {
    match f {
        FinalizeExpr::Direct { partial } => (0, [*partial, 0, 0]),
        FinalizeExpr::Mean { sum, count } => (1, [*sum, *count, 0]),
        FinalizeExpr::StdDev { sum, sum_sq, count } => (2, [*sum, *sum_sq, *count]),
        FinalizeExpr::Cv { sum, sum_sq, count } => (3, [*sum, *sum_sq, *count]),
    }
}

/// Writes `meta.db` describing every globally-uniqued entity currently
/// registered on `pipeline`. Must run after [`Pipeline::finalize_identifiers`]
/// so context and metric identifiers are stable.
pub fn write_meta_db(dir: &Path, pipeline: &Pipeline) -> Result<PathBuf, Error> {
    let path = dir.join("meta.db");
    let file = File::create(&path).map_err(|e| error::io(&path, e))?;
    let mut w = BufWriter::new(file);

    header::write_header(&mut w, &path, META_DB)?;

    let modules = pipeline.load_modules_snapshot();
    write_u32(&mut w, &path, modules.len() as u32)?;
    for module in &modules {
        write_string(&mut w, &path, &module.path)?;
        w.write_all(&module.content_hash).map_err(|e| error::io(&path, e))?;
    }

    let files = pipeline.files_snapshot();
    write_u32(&mut w, &path, files.len() as u32)?;
    for file_path in &files {
        write_string(&mut w, &path, file_path)?;
    }

    let functions = pipeline.functions_snapshot();
    write_u32(&mut w, &path, functions.len() as u32)?;
    for (name, file_id) in &functions {
        write_string(&mut w, &path, name)?;
        write_u32(&mut w, &path, file_id.unwrap_or(u32::MAX))?;
    }

    let metrics = pipeline.metrics().read();
    write_u32(&mut w, &path, metrics.len() as u32)?;
    for metric in metrics.iter() {
        write_string(&mut w, &path, metric.name())?;
        write_string(&mut w, &path, "")?;
        write_u32(&mut w, &path, metric.base_index().unwrap_or(0))?;

        write_u8(&mut w, &path, metric.scopes().len() as u8)?;
        for scope in metric.scopes() {
            write_u8(&mut w, &path, metric_scope_to_u8(*scope))?;
        }
        write_u8(&mut w, &path, u8::from(metric.visible()))?;

        write_u32(&mut w, &path, metric.partials().len() as u32)?;
        for partial in metric.partials() {
            write_u8(&mut w, &path, accumulate_to_u8(partial.accumulate))?;
            write_u8(&mut w, &path, combine_to_u8(partial.combine))?;
        }

        write_u32(&mut w, &path, metric.statistics().len() as u32)?;
        for statistic in metric.statistics() {
            write_string(&mut w, &path, &statistic.name)?;
            let (kind, args) = finalize_kind_and_args(&statistic.finalize);
            write_u8(&mut w, &path, kind)?;
            for arg in args {
                write_u32(&mut w, &path, arg)?;
            }
        }
    }
    drop(metrics);

    let contexts = pipeline.contexts();
    write_u32(&mut w, &path, contexts.len() as u32)?;
    for idx in 0..contexts.len() as u32 {
        let id = ContextId(idx);
        let final_id = contexts.final_id(id).unwrap_or(idx);
        let parent_final = contexts.parent(id).and_then(|p| contexts.final_id(p));
        write_u32(&mut w, &path, final_id)?;
        write_u32(&mut w, &path, parent_final.unwrap_or(u32::MAX))?;
        write_u8(&mut w, &path, relation_to_u8(contexts.relation(id)))?;
        let (kind, payload) = contexts.scope(id).encode();
        write_u8(&mut w, &path, kind)?;
        w.write_all(&payload).map_err(|e| error::io(&path, e))?;
    }

    header::write_footer(&mut w, &path, META_DB)?;
    Ok(path)
}

/// Reads back a `meta.db` written by [`write_meta_db`].
pub fn read_meta_db(path: &Path) -> Result<MetaDb, Error> {
    let file = File::open(path).map_err(|e| error::io(path, e))?;
    let mut r = BufReader::new(file);
    header::read_header(&mut r, path, META_DB)?;

    let mut db = MetaDb::default();

    let n_modules = read_u32(&mut r, path)?;
    for _ in 0..n_modules {
        let module_path = read_string(&mut r, path)?;
        let mut hash = [0u8; 32];
        std::io::Read::read_exact(&mut r, &mut hash).map_err(|e| error::io(path, e))?;
        db.modules.push((module_path, hash));
    }

    let n_files = read_u32(&mut r, path)?;
    for _ in 0..n_files {
        db.files.push(read_string(&mut r, path)?);
    }

    let n_functions = read_u32(&mut r, path)?;
    for _ in 0..n_functions {
        let name = read_string(&mut r, path)?;
        let file_id = read_u32(&mut r, path)?;
        db.functions.push((name, (file_id != u32::MAX).then_some(file_id)));
    }

    let n_metrics = read_u32(&mut r, path)?;
    for _ in 0..n_metrics {
        let name = read_string(&mut r, path)?;
        let description = read_string(&mut r, path)?;
        let base_index = read_u32(&mut r, path)?;
        let n_scopes = read_u8(&mut r, path)?;
        let mut scopes = Vec::with_capacity(n_scopes as usize);
        for _ in 0..n_scopes {
            let raw = read_u8(&mut r, path)?;
            scopes.push(metric_scope_from_u8(raw).ok_or(Error::BadFooter { path: path.to_path_buf() })?);
        }
        let visible = read_u8(&mut r, path)? != 0;
        let n_partials = read_u32(&mut r, path)?;
        let mut partials = Vec::with_capacity(n_partials as usize);
        for _ in 0..n_partials {
            let accumulate = accumulate_from_u8(read_u8(&mut r, path)?).ok_or(Error::BadFooter { path: path.to_path_buf() })?;
            let combine = combine_from_u8(read_u8(&mut r, path)?).ok_or(Error::BadFooter { path: path.to_path_buf() })?;
            partials.push((accumulate, combine));
        }
        let n_statistics = read_u32(&mut r, path)?;
        for _ in 0..n_statistics {
            let _ = read_string(&mut r, path)?;
            let _ = read_u8(&mut r, path)?;
            for _ in 0..3 {
                let _ = read_u32(&mut r, path)?;
            }
        }
        db.metrics.push(MetaMetric {
            name,
            description,
            base_index,
            scopes,
            visible,
            partials,
        });
    }

    let n_contexts = read_u32(&mut r, path)?;
    for _ in 0..n_contexts {
        let id = read_u32(&mut r, path)?;
        let parent_raw = read_u32(&mut r, path)?;
        let relation = relation_from_u8(read_u8(&mut r, path)?).ok_or(Error::BadFooter { path: path.to_path_buf() })?;
        let kind = read_u8(&mut r, path)?;
        let mut payload = [0u8; 12];
        std::io::Read::read_exact(&mut r, &mut payload).map_err(|e| error::io(path, e))?;
        let scope = Scope::decode(kind, payload).ok_or(Error::BadFooter { path: path.to_path_buf() })?;
        db.contexts.push(MetaContext {
            id,
            parent: (parent_raw != u32::MAX).then_some(parent_raw),
            relation,
            scope,
        });
    }

    header::read_footer(&mut r, path, META_DB)?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpa_core::metric::MetricSettings;
    use hpa_core::scope::Relation;

    #[test]
    fn round_trips_a_small_pipeline() {
        let pipeline = Pipeline::new();
        let mid = pipeline.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point, MetricScope::Execution],
            visible: true,
            order: None,
        });
        pipeline
            .metrics()
            .write()
            .get_mut(mid)
            .unwrap()
            .add_partial(AccumulateExpr::Identity, Combine::Sum);

        let root = pipeline.root();
        let _main = pipeline.context_insert(root, Relation::Call, Scope::Function(1));
        pipeline.finalize_identifiers();

        let dir = tempfile::tempdir().unwrap();
        let path = write_meta_db(dir.path(), &pipeline).unwrap();
        let db = read_meta_db(&path).unwrap();

        assert_eq!(db.metrics.len(), 1);
        assert_eq!(db.metrics[0].name, "cycles");
        assert_eq!(db.contexts.len(), 2);
    }
}
