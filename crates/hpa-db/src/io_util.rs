//! Little-endian primitive and length-prefixed string helpers shared by
//! every section writer/reader.

use std::io::{Read, Write};
use std::path::Path;

use hpa_core::id_tuple::{IdTupleElement, IdTupleKind, ThreadId};

use crate::error::{self, Error};

pub(crate) fn write_u8(w: &mut impl Write, path: &Path, v: u8) -> Result<(), Error> {
    w.write_all(&[v]).map_err(|e| error::io(path, e))
}

pub(crate) fn write_u16(w: &mut impl Write, path: &Path, v: u16) -> Result<(), Error> {
    w.write_all(&v.to_le_bytes()).map_err(|e| error::io(path, e))
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

pub(crate) fn write_bytes(w: &mut impl Write, path: &Path, v: &[u8]) -> Result<(), Error> {
    write_u32(w, path, v.len() as u32)?;
    w.write_all(v).map_err(|e| error::io(path, e))
}

pub(crate) fn write_string(w: &mut impl Write, path: &Path, v: &str) -> Result<(), Error> {
    write_bytes(w, path, v.as_bytes())
}

pub(crate) fn read_u8(r: &mut impl Read, path: &Path) -> Result<u8, Error> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    Ok(buf[0])
}

pub(crate) fn read_u16(r: &mut impl Read, path: &Path) -> Result<u16, Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    Ok(u16::from_le_bytes(buf))
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

pub(crate) fn read_bytes(r: &mut impl Read, path: &Path) -> Result<Vec<u8>, Error> {
    let len = read_u32(r, path)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| error::io(path, e))?;
    Ok(buf)
}

pub(crate) fn read_string(r: &mut impl Read, path: &Path) -> Result<String, Error> {
    let bytes = read_bytes(r, path)?;
    String::from_utf8(bytes).map_err(|_| Error::BadFooter { path: path.to_path_buf() })
}

/// Encodes a [`ThreadId`] as `(n_elements:u8, elements[n])`, each element
/// `(kind_ordinal:u16, physical_index:u64, logical_index:u64)` — 18 bytes
/// per element.
pub(crate) fn write_thread_id(w: &mut impl Write, path: &Path, id: &ThreadId) -> Result<(), Error> {
    write_u8(w, path, id.elements().len() as u8)?;
    for e in id.elements() {
        write_u16(w, path, e.kind.ordinal())?;
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
        let kind_ordinal = read_u16(r, path)?;
        let kind = IdTupleKind::from_ordinal(kind_ordinal).ok_or(Error::BadFooter { path: path.to_path_buf() })?;
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
