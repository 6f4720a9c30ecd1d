//! `trace.db`: per-thread sorted `{timestamp, context}` streams plus a
//! thread directory of stream extents.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hpa_core::id_tuple::ThreadId;
use hpa_core::Pipeline;

use crate::error::{self, Error};
use crate::header::{self, TRACE_DB};
use crate::io_util::*;

const RECORD_LEN: u64 = 8 + 4;

/// One thread's trace stream extent and time bounds.
#[derive(Debug, Clone)]
pub struct TraceDirectoryEntry {
    /// Position of this thread in directory order.
    pub prof_info_idx: u32,
    /// The thread this stream belongs to.
    pub thread: ThreadId,
    /// Byte offset of the stream's first record.
    pub start_offset: u64,
    /// Byte offset one past the stream's last record.
    pub end_offset: u64,
    /// Minimum recorded timestamp, in nanoseconds.
    pub min_time: u64,
    /// Maximum recorded timestamp, in nanoseconds.
    pub max_time: u64,
}

/// One `{timestamp, context_id}` record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRecord {
    /// Nanoseconds since the run's epoch.
    pub nanos: u64,
    /// Finalized context identifier active at this instant.
    pub context_id: u32,
}

/// A parsed `trace.db`.
#[derive(Debug, Clone, Default)]
pub struct TraceDb {
    /// Directory entries, in write order.
    pub directory: Vec<TraceDirectoryEntry>,
    /// Per-thread record streams, indexed the same as `directory`.
    pub streams: Vec<Vec<TraceRecord>>,
}

/// Writes `trace.db` from every thread's recorded timepoints. Each
/// thread's stream is sorted within [`hpa_core::perthread::PerThreadTemporary::REORDER_WINDOW`]
/// before serialization; threads that observed disorder outside that
/// window were already flagged during ingestion and are written as-sorted
/// regardless (the flag itself is diagnostic, not a refusal to write).
///
/// When `segment_size` is set, a thread's stream is split across multiple
/// directory entries once it would exceed that many bytes, each entry
/// covering a contiguous, time-ordered slice of the stream.
pub fn write_trace_db(dir: &Path, pipeline: &Pipeline, segment_size: Option<u64>) -> Result<PathBuf, Error> {
    let path = dir.join("trace.db");
    let file = File::create(&path).map_err(|e| error::io(&path, e))?;
    let mut w = BufWriter::new(file);

    header::write_header(&mut w, &path, TRACE_DB)?;

    let directory_offset_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, 0)?;

    let records_per_segment = segment_size.map(|cap| (cap / RECORD_LEN).max(1) as usize);

    let mut directory = Vec::new();
    pipeline.with_finalized_threads(|threads| -> Result<(), Error> {
        for (idx, temp) in threads.iter().enumerate() {
            if temp.has_unbounded_disorder() {
                tracing::warn!(thread = %temp.thread(), "writing trace stream with unbounded disorder");
            }

            let mut records: Vec<TraceRecord> = temp
                .timepoints()
                .iter()
                .map(|tp| TraceRecord {
                    nanos: tp.nanos,
                    context_id: pipeline.contexts().final_id(tp.context).unwrap_or(tp.context.0),
                })
                .collect();
            records.sort_by_key(|r| r.nanos);

            let chunk_size = records_per_segment.unwrap_or_else(|| records.len().max(1));
            for chunk in records.chunks(chunk_size).chain(if records.is_empty() { Some(&records[..]) } else { None }) {
                let start_offset = w.stream_position().map_err(|e| error::io(&path, e))?;
                for record in chunk {
                    write_u64(&mut w, &path, record.nanos)?;
                    write_u32(&mut w, &path, record.context_id)?;
                }
                let end_offset = w.stream_position().map_err(|e| error::io(&path, e))?;

                let min_time = chunk.first().map_or(0, |r| r.nanos);
                let max_time = chunk.last().map_or(0, |r| r.nanos);
                directory.push(TraceDirectoryEntry {
                    prof_info_idx: idx as u32,
                    thread: temp.thread().clone(),
                    start_offset,
                    end_offset,
                    min_time,
                    max_time,
                });
            }
        }
        Ok(())
    })?;

    let directory_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    write_u32(&mut w, &path, directory.len() as u32)?;
    for entry in &directory {
        write_u32(&mut w, &path, entry.prof_info_idx)?;
        write_thread_id(&mut w, &path, &entry.thread)?;
        write_u64(&mut w, &path, entry.start_offset)?;
        write_u64(&mut w, &path, entry.end_offset)?;
        write_u64(&mut w, &path, entry.min_time)?;
        write_u64(&mut w, &path, entry.max_time)?;
    }

    let end_pos = w.stream_position().map_err(|e| error::io(&path, e))?;
    w.seek(SeekFrom::Start(directory_offset_pos)).map_err(|e| error::io(&path, e))?;
    write_u64(&mut w, &path, directory_pos)?;
    w.seek(SeekFrom::Start(end_pos)).map_err(|e| error::io(&path, e))?;

    header::write_footer(&mut w, &path, TRACE_DB)?;
    Ok(path)
}

/// Reads back a `trace.db` written by [`write_trace_db`].
pub fn read_trace_db(path: &Path) -> Result<TraceDb, Error> {
    let file = File::open(path).map_err(|e| error::io(path, e))?;
    let mut r = BufReader::new(file);
    header::read_header(&mut r, path, TRACE_DB)?;

    let directory_offset = read_u64(&mut r, path)?;
    r.seek(SeekFrom::Start(directory_offset)).map_err(|e| error::io(path, e))?;

    let n = read_u32(&mut r, path)?;
    let mut directory = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let prof_info_idx = read_u32(&mut r, path)?;
        let thread = read_thread_id(&mut r, path)?;
        let start_offset = read_u64(&mut r, path)?;
        let end_offset = read_u64(&mut r, path)?;
        let min_time = read_u64(&mut r, path)?;
        let max_time = read_u64(&mut r, path)?;
        directory.push(TraceDirectoryEntry {
            prof_info_idx,
            thread,
            start_offset,
            end_offset,
            min_time,
            max_time,
        });
    }

    let mut streams = Vec::with_capacity(directory.len());
    for entry in &directory {
        r.seek(SeekFrom::Start(entry.start_offset)).map_err(|e| error::io(path, e))?;
        let n_records = (entry.end_offset - entry.start_offset) / RECORD_LEN;
        let mut stream = Vec::with_capacity(n_records as usize);
        for _ in 0..n_records {
            let nanos = read_u64(&mut r, path)?;
            let context_id = read_u32(&mut r, path)?;
            stream.push(TraceRecord { nanos, context_id });
        }
        streams.push(stream);
    }

    r.seek(SeekFrom::End(-(header::FOOTER_LEN as i64))).map_err(|e| error::io(path, e))?;
    header::read_footer(&mut r, path, TRACE_DB)?;

    Ok(TraceDb { directory, streams })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpa_core::id_tuple::{IdTupleElement, IdTupleKind};
    use hpa_core::metric::{MetricScope, MetricSettings};
    use hpa_core::scope::{Relation, Scope};

    #[test]
    fn sorts_out_of_order_timepoints_within_the_window() {
        let pipeline = Pipeline::new();
        let _mid = pipeline.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        let root = pipeline.root();
        let main = pipeline.context_insert(root, Relation::Call, Scope::Function(1));
        pipeline.finalize_identifiers();

        let tid = ThreadId::new([IdTupleElement {
            kind: IdTupleKind::Rank,
            physical_index: 0,
            logical_index: 0,
        }]);
        let (_tid, mut temp) = pipeline.thread_add(tid);
        pipeline.ctx_timepoint_add(&mut temp, 100, main);
        pipeline.ctx_timepoint_add(&mut temp, 90, main);
        pipeline.ctx_timepoint_add(&mut temp, 110, main);
        pipeline.thread_store(temp);

        let dir = tempfile::tempdir().unwrap();
        let path = write_trace_db(dir.path(), &pipeline, None).unwrap();
        let db = read_trace_db(&path).unwrap();

        assert_eq!(db.streams.len(), 1);
        let nanos: Vec<u64> = db.streams[0].iter().map(|r| r.nanos).collect();
        assert_eq!(nanos, vec![90, 100, 110]);
        assert_eq!(db.directory[0].min_time, 90);
        assert_eq!(db.directory[0].max_time, 110);
    }

    #[test]
    fn segment_size_splits_a_long_stream_into_multiple_directory_entries() {
        let pipeline = Pipeline::new();
        let _mid = pipeline.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        let root = pipeline.root();
        let main = pipeline.context_insert(root, Relation::Call, Scope::Function(1));
        pipeline.finalize_identifiers();

        let tid = ThreadId::new([IdTupleElement {
            kind: IdTupleKind::Rank,
            physical_index: 0,
            logical_index: 0,
        }]);
        let (_tid, mut temp) = pipeline.thread_add(tid);
        for nanos in 0..10 {
            pipeline.ctx_timepoint_add(&mut temp, nanos, main);
        }
        pipeline.thread_store(temp);

        let dir = tempfile::tempdir().unwrap();
        // 3 records per segment (3 * RECORD_LEN bytes), 10 records total.
        let path = write_trace_db(dir.path(), &pipeline, Some(3 * RECORD_LEN)).unwrap();
        let db = read_trace_db(&path).unwrap();

        assert_eq!(db.directory.len(), 4);
        assert_eq!(db.streams.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 3, 1]);
        let nanos: Vec<u64> = db.streams.iter().flatten().map(|r| r.nanos).collect();
        assert_eq!(nanos, (0..10).collect::<Vec<u64>>());
    }
}
