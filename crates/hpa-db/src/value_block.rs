//! The sparse value block shared by `cct.db` and `profile.db`: a fixed
//! 32-byte header (`fmt_cctdb_ctxInfo_t`) followed by a `(index, value)`
//! array and a `(metric_id, start_index)` index array.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{self, Error};

/// Encoded size of a [`ValueBlockHeader`]: `nValues@0x00, pValues@0x08,
/// nMetrics@0x10, pMetricIndices@0x18`, padded to `0x20` total.
pub const VALUE_BLOCK_HEADER_LEN: usize = 0x20;
/// Encoded size of one `(index:u32, value:f64)` entry.
pub const VALUE_ENTRY_LEN: usize = 12;
/// Encoded size of one `(metric_id:u16, start_index:u64)` entry.
pub const METRIC_INDEX_ENTRY_LEN: usize = 10;

/// The fixed-layout header pointing at a value block's two arrays.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValueBlockHeader {
    /// Total number of `(index, value)` entries across all metrics.
    pub n_values: u64,
    /// File offset of the `(index, value)` array.
    pub p_values: u64,
    /// Number of distinct metrics present in this block.
    pub n_metrics: u16,
    /// File offset of the `(metric_id, start_index)` array.
    pub p_metric_indices: u64,
}

impl ValueBlockHeader {
    /// Encodes the header as its fixed 32-byte on-disk representation.
    #[must_use]
    pub fn encode(&self) -> [u8; VALUE_BLOCK_HEADER_LEN] {
        let mut buf = [0u8; VALUE_BLOCK_HEADER_LEN];
        buf[0x00..0x08].copy_from_slice(&self.n_values.to_le_bytes());
        buf[0x08..0x10].copy_from_slice(&self.p_values.to_le_bytes());
        buf[0x10..0x12].copy_from_slice(&self.n_metrics.to_le_bytes());
        buf[0x18..0x20].copy_from_slice(&self.p_metric_indices.to_le_bytes());
        buf
    }

    /// Decodes a header from its fixed 32-byte on-disk representation.
    #[must_use]
    pub fn decode(buf: &[u8; VALUE_BLOCK_HEADER_LEN]) -> Self {
        Self {
            n_values: u64::from_le_bytes(buf[0x00..0x08].try_into().expect("8 bytes")),
            p_values: u64::from_le_bytes(buf[0x08..0x10].try_into().expect("8 bytes")),
            n_metrics: u16::from_le_bytes(buf[0x10..0x12].try_into().expect("2 bytes")),
            p_metric_indices: u64::from_le_bytes(buf[0x18..0x20].try_into().expect("8 bytes")),
        }
    }
}

/// One `(index, value)` entry. `index` is a context id in `profile.db`'s
/// value blocks and a profile (thread) id in `cct.db`'s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueEntry {
    /// The row index this value belongs to.
    pub index: u32,
    /// The metric value itself.
    pub value: f64,
}

impl ValueEntry {
    /// Encodes this entry as its fixed 12-byte on-disk representation.
    #[must_use]
    pub fn encode(&self) -> [u8; VALUE_ENTRY_LEN] {
        let mut buf = [0u8; VALUE_ENTRY_LEN];
        buf[0..4].copy_from_slice(&self.index.to_le_bytes());
        buf[4..12].copy_from_slice(&self.value.to_le_bytes());
        buf
    }

    /// Decodes an entry from its fixed 12-byte on-disk representation.
    #[must_use]
    pub fn decode(buf: &[u8; VALUE_ENTRY_LEN]) -> Self {
        Self {
            index: u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes")),
            value: f64::from_le_bytes(buf[4..12].try_into().expect("8 bytes")),
        }
    }
}

/// One `(metric_id, start_index)` entry: `metric_id`'s contiguous run in
/// the value array begins at `start_index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricIndexEntry {
    /// The metric this run belongs to.
    pub metric_id: u16,
    /// Index into the value array at which this metric's run begins.
    pub start_index: u64,
}

impl MetricIndexEntry {
    /// Encodes this entry as its fixed 10-byte on-disk representation.
    #[must_use]
    pub fn encode(&self) -> [u8; METRIC_INDEX_ENTRY_LEN] {
        let mut buf = [0u8; METRIC_INDEX_ENTRY_LEN];
        buf[0..2].copy_from_slice(&self.metric_id.to_le_bytes());
        buf[2..10].copy_from_slice(&self.start_index.to_le_bytes());
        buf
    }

    /// Decodes an entry from its fixed 10-byte on-disk representation.
    #[must_use]
    pub fn decode(buf: &[u8; METRIC_INDEX_ENTRY_LEN]) -> Self {
        Self {
            metric_id: u16::from_le_bytes(buf[0..2].try_into().expect("2 bytes")),
            start_index: u64::from_le_bytes(buf[2..10].try_into().expect("8 bytes")),
        }
    }
}

/// Writes one value block at the writer's current position: a placeholder
/// header, the value array, the metric-index array, then seeks back to
/// patch the header's offsets. `values` must already be grouped by metric
/// in `metric_indices` order. Returns the file offset the header itself
/// was written at.
pub fn write_value_block<W: Write + Seek>(
    w: &mut W,
    path: &Path,
    values: &[ValueEntry],
    metric_indices: &[MetricIndexEntry],
) -> Result<u64, Error> {
    let header_pos = w.stream_position().map_err(|e| error::io(path, e))?;
    w.write_all(&[0u8; VALUE_BLOCK_HEADER_LEN]).map_err(|e| error::io(path, e))?;

    let p_values = w.stream_position().map_err(|e| error::io(path, e))?;
    for entry in values {
        w.write_all(&entry.encode()).map_err(|e| error::io(path, e))?;
    }

    let p_metric_indices = w.stream_position().map_err(|e| error::io(path, e))?;
    for entry in metric_indices {
        w.write_all(&entry.encode()).map_err(|e| error::io(path, e))?;
    }

    let end_pos = w.stream_position().map_err(|e| error::io(path, e))?;

    let header = ValueBlockHeader {
        n_values: values.len() as u64,
        p_values,
        n_metrics: metric_indices.len() as u16,
        p_metric_indices,
    };
    w.seek(SeekFrom::Start(header_pos)).map_err(|e| error::io(path, e))?;
    w.write_all(&header.encode()).map_err(|e| error::io(path, e))?;
    w.seek(SeekFrom::Start(end_pos)).map_err(|e| error::io(path, e))?;

    Ok(header_pos)
}

/// Reads the value block whose header starts at `header_pos`.
pub fn read_value_block<R: Read + Seek>(
    r: &mut R,
    path: &Path,
    header_pos: u64,
) -> Result<(ValueBlockHeader, Vec<ValueEntry>, Vec<MetricIndexEntry>), Error> {
    r.seek(SeekFrom::Start(header_pos)).map_err(|e| error::io(path, e))?;
    let mut header_buf = [0u8; VALUE_BLOCK_HEADER_LEN];
    r.read_exact(&mut header_buf).map_err(|e| error::io(path, e))?;
    let header = ValueBlockHeader::decode(&header_buf);

    r.seek(SeekFrom::Start(header.p_values)).map_err(|e| error::io(path, e))?;
    let mut values = Vec::with_capacity(header.n_values as usize);
    for _ in 0..header.n_values {
        let mut buf = [0u8; VALUE_ENTRY_LEN];
        r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
        values.push(ValueEntry::decode(&buf));
    }

    r.seek(SeekFrom::Start(header.p_metric_indices))
        .map_err(|e| error::io(path, e))?;
    let mut metric_indices = Vec::with_capacity(header.n_metrics as usize);
    for _ in 0..header.n_metrics {
        let mut buf = [0u8; METRIC_INDEX_ENTRY_LEN];
        r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
        metric_indices.push(MetricIndexEntry::decode(&buf));
    }

    Ok((header, values, metric_indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_encode_decode_round_trip() {
        let header = ValueBlockHeader {
            n_values: 3,
            p_values: 0x20,
            n_metrics: 1,
            p_metric_indices: 0x50,
        };
        assert_eq!(ValueBlockHeader::decode(&header.encode()), header);
    }

    #[test]
    fn value_block_round_trips_through_a_cursor() {
        let values = vec![
            ValueEntry { index: 0, value: 1.5 },
            ValueEntry { index: 1, value: 2.5 },
            ValueEntry { index: 2, value: 3.5 },
        ];
        let metric_indices = vec![MetricIndexEntry {
            metric_id: 7,
            start_index: 0,
        }];

        let mut cursor = Cursor::new(Vec::new());
        let header_pos = write_value_block(&mut cursor, Path::new("test"), &values, &metric_indices).unwrap();
        assert_eq!(header_pos, 0);

        let (header, read_values, read_indices) =
            read_value_block(&mut cursor, Path::new("test"), header_pos).unwrap();
        assert_eq!(header.n_values, 3);
        assert_eq!(header.n_metrics, 1);
        assert_eq!(read_values, values);
        assert_eq!(read_indices, metric_indices);
    }
}
