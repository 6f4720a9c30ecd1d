//! `cct.db`: the columnar transpose of `profile.db` — one sparse value
//! block per context, inner dimension is the profile. Built from the same
//! per-thread accumulator cells; only the grouping key changes.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hpa_core::id_tuple::ThreadId;
use hpa_core::Pipeline;

use crate::error::{self, Error};
use crate::header::{self, CCT_DB};
use crate::io_util::*;
use crate::value_block::{read_value_block, write_value_block, MetricIndexEntry, ValueEntry};

/// One context's parsed sparse values, indexed by profile position.
#[derive(Debug, Clone)]
pub struct CtxEntry {
    /// Finalized context identifier.
    pub context_id: u32,
    /// `(profile_index, value)` entries, grouped by metric.
    pub values: Vec<ValueEntry>,
    /// Per-metric runs into `values`.
    pub metric_indices: Vec<MetricIndexEntry>,
}

/// A parsed `cct.db`.
#[derive(Debug, Clone, Default)]
pub struct CctDb {
    /// Profiles in directory order, matching `profile.db`'s ordering.
    pub profiles: Vec<ThreadId>,
    /// One entry per context with at least one value.
    pub contexts: Vec<CtxEntry>,
}

/// Writes `cct.db`: the same per-thread point values `profile.db` writes,
/// transposed so each value block's inner array runs over profiles instead
/// of contexts. Must run after [`Pipeline::finalize_identifiers`].
pub fn write_cct_db(dir: &Path, pipeline: &Pipeline) -> Result<PathBuf, Error> {
    let path = dir.join("cct.db");
    let file = File::create(&path).map_err(|e| error::io(&path, e))?;
    let mut w = BufWriter::new(file);

    header::write_header(&mut w, &path, CCT_DB)?;

    let profile_directory_offset_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, 0)?;
    let context_directory_offset_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, 0)?;

    // by_context[ctx][metric] = Vec<(profile_index, value)>
    let (profiles, mut by_context): (
        Vec<ThreadId>,
        std::collections::BTreeMap<u32, std::collections::BTreeMap<u16, Vec<ValueEntry>>>,
    ) = pipeline.with_finalized_threads(|threads| {
        let mut profiles = Vec::with_capacity(threads.len());
        let mut by_context: std::collections::BTreeMap<u32, std::collections::BTreeMap<u16, Vec<ValueEntry>>> =
            std::collections::BTreeMap::new();
        for (profile_index, temp) in threads.iter().enumerate() {
            profiles.push(temp.thread().clone());
            for ((ctx, metric), acc) in temp.cells() {
                let ctx_id = pipeline.contexts().final_id(ctx).unwrap_or(ctx.0);
                by_context.entry(ctx_id).or_default().entry(metric.0 as u16).or_default().push(ValueEntry {
                    index: profile_index as u32,
                    value: acc.point(),
                });
            }
        }
        (profiles, by_context)
    });

    let mut context_directory = Vec::with_capacity(by_context.len());
    for (ctx_id, by_metric) in by_context.iter_mut() {
        let mut values = Vec::new();
        let mut metric_indices = Vec::with_capacity(by_metric.len());
        for (&metric_id, entries) in by_metric.iter_mut() {
            entries.sort_by_key(|e| e.index);
            metric_indices.push(MetricIndexEntry {
                metric_id,
                start_index: values.len() as u64,
            });
            values.extend_from_slice(entries);
        }
        let header_pos = write_value_block(&mut w, &path, &values, &metric_indices)?;
        context_directory.push((*ctx_id, header_pos));
    }

    let profile_directory_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u32(&mut w, &path, profiles.len() as u32)?;
    for thread in &profiles {
        write_thread_id(&mut w, &path, thread)?;
    }

    let context_directory_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u32(&mut w, &path, context_directory.len() as u32)?;
    for (ctx_id, header_pos) in &context_directory {
        write_u32(&mut w, &path, *ctx_id)?;
        write_u64(&mut w, &path, *header_pos)?;
    }

    let end_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    w.seek(SeekFrom::Start(profile_directory_offset_pos))
        .map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, profile_directory_pos)?;
    w.seek(SeekFrom::Start(context_directory_offset_pos))
        .map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, context_directory_pos)?;
    w.seek(SeekFrom::Start(end_pos)).map_err(|e| error::io(&path, e))?;

    header::write_footer(&mut w, &path, CCT_DB)?;
    Ok(path)
}

/// Reads back a `cct.db` written by [`write_cct_db`].
pub fn read_cct_db(path: &Path) -> Result<CctDb, Error> {
    let file = File::open(path).map_err(|e| error::io(path, e))?;
    let mut r = BufReader::new(file);
    header::read_header(&mut r, path, CCT_DB)?;

    let profile_directory_offset = read_u64(&mut r, path)?;
    let context_directory_offset = read_u64(&mut r, path)?;

    r.seek(SeekFrom::Start(profile_directory_offset)).map_err(|e| error::io(path, e))?;
    let n_profiles = read_u32(&mut r, path)?;
    let mut profiles = Vec::with_capacity(n_profiles as usize);
    for _ in 0..n_profiles {
        profiles.push(read_thread_id(&mut r, path)?);
    }

    r.seek(SeekFrom::Start(context_directory_offset)).map_err(|e| error::io(path, e))?;
    let n_contexts = read_u32(&mut r, path)?;
    let mut directory = Vec::with_capacity(n_contexts as usize);
    for _ in 0..n_contexts {
        let ctx_id = read_u32(&mut r, path)?;
        let header_pos = read_u64(&mut r, path)?;
        directory.push((ctx_id, header_pos));
    }

    let mut contexts = Vec::with_capacity(directory.len());
    for (ctx_id, header_pos) in directory {
        let (_header, values, metric_indices) = read_value_block(&mut r, path, header_pos)?;
        contexts.push(CtxEntry {
            context_id: ctx_id,
            values,
            metric_indices,
        });
    }

    r.seek(SeekFrom::End(-(header::FOOTER_LEN as i64))).map_err(|e| error::io(path, e))?;
    header::read_footer(&mut r, path, CCT_DB)?;

    Ok(CctDb { profiles, contexts })
}
