//! `profile.db`: one sparse value block per profile (thread), directory at
//! end of file. Outer dimension is the profile, inner is the context —
//! the natural layout for "per-thread-this-run-of-contexts" scans.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hpa_core::id_tuple::ThreadId;
use hpa_core::Pipeline;

use crate::error::{self, Error};
use crate::header::{self, PROFILE_DB};
use crate::io_util::*;
use crate::value_block::{read_value_block, write_value_block, MetricIndexEntry, ValueEntry};

/// One profile's parsed sparse values.
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    /// The identifier tuple this profile belongs to.
    pub thread: ThreadId,
    /// `(context_final_id, value)` entries, grouped by metric.
    pub values: Vec<ValueEntry>,
    /// Per-metric runs into `values`.
    pub metric_indices: Vec<MetricIndexEntry>,
}

/// A parsed `profile.db`.
#[derive(Debug, Clone, Default)]
pub struct ProfileDb {
    /// One entry per profile, in directory order.
    pub profiles: Vec<ProfileEntry>,
}

/// Writes `profile.db` from every thread handed back to `pipeline` via
/// [`Pipeline::thread_store`]. Must run after [`Pipeline::finalize_identifiers`]
/// so context ids in the value blocks are final.
pub fn write_profile_db(dir: &Path, pipeline: &Pipeline) -> Result<PathBuf, Error> {
    let path = dir.join("profile.db");
    let file = File::create(&path).map_err(|e| error::io(&path, e))?;
    let mut w = BufWriter::new(file);

    header::write_header(&mut w, &path, PROFILE_DB)?;

    let directory_offset_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, 0)?;

    let directory: Vec<(ThreadId, u64)> = pipeline.with_finalized_threads(|threads| {
        let mut directory = Vec::with_capacity(threads.len());
        for temp in threads {
            let mut by_metric: std::collections::BTreeMap<u16, Vec<ValueEntry>> = std::collections::BTreeMap::new();
            for ((ctx, metric), acc) in temp.cells() {
                let index = pipeline.contexts().final_id(ctx).unwrap_or(ctx.0);
                by_metric
                    .entry(metric.0 as u16)
                    .or_default()
                    .push(ValueEntry { index, value: acc.point() });
            }

            let mut values = Vec::new();
            let mut metric_indices = Vec::with_capacity(by_metric.len());
            for (metric_id, mut entries) in by_metric {
                entries.sort_by_key(|e| e.index);
                metric_indices.push(MetricIndexEntry {
                    metric_id,
                    start_index: values.len() as u64,
                });
                values.extend(entries);
            }

            let header_pos = write_value_block(&mut w, &path, &values, &metric_indices)?;
            directory.push((temp.thread().clone(), header_pos));
        }
        Ok::<_, Error>(directory)
    })?;

    let directory_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u32(&mut w, &path, directory.len() as u32)?;
    for (thread, header_pos) in &directory {
        write_thread_id(&mut w, &path, thread)?;
        write_u64(&mut w, &path, *header_pos)?;
    }

    let end_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    w.seek(SeekFrom::Start(directory_offset_pos)).map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, directory_pos)?;
    w.seek(SeekFrom::Start(end_pos)).map_err(|e| error::io(&path, e))?;

    header::write_footer(&mut w, &path, PROFILE_DB)?;
    Ok(path)
}

/// Reads back a `profile.db` written by [`write_profile_db`].
pub fn read_profile_db(path: &Path) -> Result<ProfileDb, Error> {
    let file = File::open(path).map_err(|e| error::io(path, e))?;
    let mut r = BufReader::new(file);
    header::read_header(&mut r, path, PROFILE_DB)?;

    let directory_offset = read_u64(&mut r, path)?;
    r.seek(SeekFrom::Start(directory_offset)).map_err(|e| error::io(path, e))?;

    let n = read_u32(&mut r, path)?;
    let mut directory = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let thread = read_thread_id(&mut r, path)?;
        let header_pos = read_u64(&mut r, path)?;
        directory.push((thread, header_pos));
    }

    let mut profiles = Vec::with_capacity(directory.len());
    for (thread, header_pos) in directory {
        let (_header, values, metric_indices) = read_value_block(&mut r, path, header_pos)?;
        profiles.push(ProfileEntry {
            thread,
            values,
            metric_indices,
        });
    }

    r.seek(SeekFrom::End(-(header::FOOTER_LEN as i64)))
        .map_err(|e| error::io(path, e))?;
    header::read_footer(&mut r, path, PROFILE_DB)?;

    Ok(ProfileDb { profiles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpa_core::id_tuple::{IdTupleElement, IdTupleKind};
    use hpa_core::metric::{AccumulateExpr, Combine, MetricSettings, MetricScope};
    use hpa_core::scope::{Relation, Scope};

    #[test]
    fn round_trips_two_threads_one_metric() {
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
        let main = pipeline.context_insert(root, Relation::Call, Scope::Function(1));

        for rank in 0..2u64 {
            let tid = ThreadId::new([IdTupleElement {
                kind: IdTupleKind::Rank,
                physical_index: rank,
                logical_index: rank,
            }]);
            let (_tid, mut temp) = pipeline.thread_add(tid);
            pipeline.value_add(&mut temp, main, mid, (rank + 1) as f64);
            pipeline.notify_thread_final(&mut temp).unwrap();
            pipeline.thread_store(temp);
        }
        pipeline.finalize_identifiers();

        let dir = tempfile::tempdir().unwrap();
        let path = write_profile_db(dir.path(), &pipeline).unwrap();
        let db = read_profile_db(&path).unwrap();

        assert_eq!(db.profiles.len(), 2);
        let total: f64 = db
            .profiles
            .iter()
            .flat_map(|p| p.values.iter())
            .map(|v| v.value)
            .sum();
        assert_eq!(total, 1.0 + 2.0);
    }
}
