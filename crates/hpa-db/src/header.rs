//! Common 16-byte magic header and 8-byte footer shared by all four
//! database files.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::{self, Error};

/// Length in bytes of a file tag.
pub const MAGIC_LEN: usize = 14;
/// Length in bytes of a footer tag.
pub const FOOTER_LEN: usize = 8;
/// Major version stamped into every file this writer produces.
pub const MAJOR_VERSION: u8 = 4;

/// One database file's identity: its magic tag, footer tag, and the minor
/// version this writer emits.
#[derive(Debug, Clone, Copy)]
pub struct FileKind {
    /// 14-byte ASCII file tag.
    pub magic: &'static [u8; MAGIC_LEN],
    /// 8-byte ASCII footer tag.
    pub footer: &'static [u8; FOOTER_LEN],
    /// Minor version this writer emits.
    pub minor_version: u8,
}

/// `meta.db`: metrics, modules, files, functions, contexts, id tables.
pub const META_DB: FileKind = FileKind {
    magic: b"HPCTOOLKITmeta",
    footer: b"_meta.db",
    minor_version: 0,
};
/// `profile.db`: per-profile sparse metric values.
pub const PROFILE_DB: FileKind = FileKind {
    magic: b"HPCTOOLKITprof",
    footer: b"_prof.db",
    minor_version: 0,
};
/// `cct.db`: per-context sparse metric values (columnar transpose).
pub const CCT_DB: FileKind = FileKind {
    magic: b"HPCTOOLKITctxt",
    footer: b"__ctx.db",
    minor_version: 0,
};
/// `trace.db`: per-thread sorted timepoint streams.
pub const TRACE_DB: FileKind = FileKind {
    magic: b"HPCTOOLKITtrce",
    footer: b"__trc.db",
    minor_version: 0,
};

/// How a reader's supported minor version compares to a file's written
/// minor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionClass {
    /// Exact match.
    Exact,
    /// File is older than the reader; all fields the reader knows about
    /// are present.
    Backward,
    /// File is newer than the reader but append-only extensions are
    /// assumed safe to skip.
    ForwardCompatible,
    /// File is newer in a way the reader cannot safely interpret.
    Invalid,
}

/// Classifies `file_minor` against `reader_minor` for the same major
/// version.
#[must_use]
pub fn classify_version(reader_minor: u8, file_minor: u8) -> VersionClass {
    match file_minor.cmp(&reader_minor) {
        std::cmp::Ordering::Equal => VersionClass::Exact,
        std::cmp::Ordering::Less => VersionClass::Backward,
        std::cmp::Ordering::Greater if file_minor - reader_minor <= 1 => VersionClass::ForwardCompatible,
        std::cmp::Ordering::Greater => VersionClass::Invalid,
    }
}

/// Writes the 16-byte magic header (14-byte tag, major, minor).
pub fn write_header(w: &mut impl Write, path: &Path, kind: FileKind) -> Result<(), Error> {
    w.write_all(kind.magic).map_err(|e| error::io(path, e))?;
    w.write_all(&[MAJOR_VERSION, kind.minor_version])
        .map_err(|e| error::io(path, e))
}

/// Writes the 8-byte footer tag.
pub fn write_footer(w: &mut impl Write, path: &Path, kind: FileKind) -> Result<(), Error> {
    w.write_all(kind.footer).map_err(|e| error::io(path, e))
}

/// Reads and validates the 16-byte magic header, returning the minor
/// version found.
pub fn read_header(r: &mut impl Read, path: &Path, kind: FileKind) -> Result<u8, Error> {
    let mut magic = [0u8; MAGIC_LEN];
    r.read_exact(&mut magic).map_err(|e| error::io(path, e))?;
    if &magic != kind.magic {
        return Err(Error::BadMagic {
            path: path.to_path_buf(),
            expected: *kind.magic,
            found: magic,
        });
    }
    let mut version = [0u8; 2];
    r.read_exact(&mut version).map_err(|e| error::io(path, e))?;
    match classify_version(kind.minor_version, version[1]) {
        VersionClass::Invalid => Err(Error::UnsupportedVersion {
            path: path.to_path_buf(),
            minor: version[1],
        }),
        _ => Ok(version[1]),
    }
}

/// Reads and validates the 8-byte footer tag.
pub fn read_footer(r: &mut impl Read, path: &Path, kind: FileKind) -> Result<(), Error> {
    let mut footer = [0u8; FOOTER_LEN];
    r.read_exact(&mut footer).map_err(|e| error::io(path, e))?;
    if &footer != kind.footer {
        return Err(Error::BadFooter {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_tags_are_fourteen_bytes() {
        for kind in [META_DB, PROFILE_DB, CCT_DB, TRACE_DB] {
            assert_eq!(kind.magic.len(), MAGIC_LEN);
            assert_eq!(kind.footer.len(), FOOTER_LEN);
        }
    }

    #[test]
    fn header_round_trips() {
        let mut buf = Vec::new();
        write_header(&mut buf, Path::new("meta.db"), META_DB).unwrap();
        let minor = read_header(&mut &buf[..], Path::new("meta.db"), META_DB).unwrap();
        assert_eq!(minor, META_DB.minor_version);
    }

    #[test]
    fn mismatched_magic_is_rejected() {
        let mut buf = Vec::new();
        write_header(&mut buf, Path::new("meta.db"), META_DB).unwrap();
        let err = read_header(&mut &buf[..], Path::new("meta.db"), PROFILE_DB).unwrap_err();
        assert!(matches!(err, Error::BadMagic { .. }));
    }

    #[test]
    fn version_classification() {
        assert_eq!(classify_version(2, 2), VersionClass::Exact);
        assert_eq!(classify_version(2, 1), VersionClass::Backward);
        assert_eq!(classify_version(2, 3), VersionClass::ForwardCompatible);
        assert_eq!(classify_version(2, 5), VersionClass::Invalid);
    }
}
