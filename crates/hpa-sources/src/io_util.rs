//! Little-endian primitive helpers for the raw measurement format, mirroring
//! `hpa-db`'s internal wire codec so both crates read/write the same shapes
//! without sharing a private module across the crate boundary.

use std::io::{Read, Write};
use std::path::Path;

use hpa_core::id_tuple::{IdTupleElement, IdTupleKind, ThreadId};

use crate::error::{self, Error};

pub(crate) fn write_u8(w: &mut impl Write, path: &Path, v: u8) -> Result<(), Error> {
    w.write_all(&[v]).map_err(|e| error::io(path, e))
}

pub(crate) fn write_u32(w: &mut impl Write, path: &Path, v: u32) -> Result<(), Error> {
    w.write_all(&v.to_le_bytes()).map_err(|e| error::io(path, e))
}

pub(crate) fn write_u64(w: &mut impl Write, path: &Path, v: u64) -> Result<(), Error> {
    w.write_all(&v.to_le_bytes()).map_err(|e| error::io(path, e))
}

pub(crate) fn write_f64(w: &mut impl Write, path: &Path, v: f64) -> Result<(), Error> {
    w.write_all(&v.to_le_bytes()).map_err(|e| error::io(path, e))
}

pub(crate) fn write_string(w: &mut impl Write, path: &Path, v: &str) -> Result<(), Error> {
    write_u32(w, path, v.len() as u32)?;
    w.write_all(v.as_bytes()).map_err(|e| error::io(path, e))
}

pub(crate) fn read_u8(r: &mut impl Read, path: &Path) -> Result<u8, Error> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    Ok(buf[0])
}

pub(crate) fn read_u32(r: &mut impl Read, path: &Path) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(r: &mut impl Read, path: &Path) -> Result<u64, Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_f64(r: &mut impl Read, path: &Path) -> Result<f64, Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    Ok(f64::from_le_bytes(buf))
}

pub(crate) fn read_string(r: &mut impl Read, path: &Path) -> Result<String, Error> {
    let len = read_u32(r, path)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    String::from_utf8(buf).map_err(|_| Error::Malformed {
        path: path.to_path_buf(),
        reason: "string field is not valid UTF-8".to_string(),
    })
}

/// Encodes a [`ThreadId`], matching the layout `hpa-db` uses for the same
/// type in its section directories.
pub(crate) fn write_thread_id(w: &mut impl Write, path: &Path, id: &ThreadId) -> Result<(), Error> {
    write_u8(w, path, id.elements().len() as u8)?;
    for e in id.elements() {
        w.write_all(&e.kind.ordinal().to_le_bytes()).map_err(|err| error::io(path, err))?;
        write_u64(w, path, e.physical_index)?;
        write_u64(w, path, e.logical_index)?;
    }
    Ok(())
}

/// Reverses [`write_thread_id`].
pub(crate) fn read_thread_id(r: &mut impl Read, path: &Path) -> Result<ThreadId, Error> {
    let n = read_u8(r, path)?;
    let mut elements = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let mut kind_buf = [0u8; 2];
        r.read_exact(&mut kind_buf).map_err(|e| error::io(path, e))?;
        let kind = IdTupleKind::from_ordinal(u16::from_le_bytes(kind_buf)).ok_or_else(|| Error::Malformed {
            path: path.to_path_buf(),
            reason: "unknown id-tuple element kind".to_string(),
        })?;
        let physical_index = read_u64(r, path)?;
        let logical_index = read_u64(r, path)?;
        elements.push(IdTupleElement {
            kind,
            physical_index,
            logical_index,
        });
    }
    Ok(ThreadId::new(elements))
}
