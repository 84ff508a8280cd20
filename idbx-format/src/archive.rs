//! Reading content records out of archive files.
//!
//! An archive starts with a preamble terminated by a zero byte. Records
//! follow, each laid out as
//!
//! ```text
//! u16 (big-endian)  path length N
//! [u8; N]           path, as declared in the IDB
//! [u8; extent]      contents, raw or compressed
//! ```
//!
//! Records are addressed by absolute offset or read one after another from
//! wherever the previous record ended.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};

use crate::compression::{Codec, CodecError};
use crate::directive::ArchiveRef;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive not found. Archive: '{name}', directory: '{}'", .dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("Opening archive failed. Path: '{}'", .1.display())]
    Open(#[source] io::Error, PathBuf),

    #[error("wrong pathlen: expected {expected}, found {found}")]
    WrongPathLength { expected: usize, found: u16 },

    #[error("wrong path: expected \"{expected}\", found \"{found}\"")]
    WrongPath { expected: String, found: String },

    #[error("unexpected end of archive")]
    UnexpectedEof,

    #[error("unexpected size of decompressed data: expected {expected}, got {actual}")]
    DecompressedSize { expected: u64, actual: u64 },

    #[error("Decompressing record failed")]
    Decompress(#[source] CodecError),

    #[error("Reading archive failed")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ArchiveError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => ArchiveError::UnexpectedEof,
            _ => ArchiveError::Io(error),
        }
    }
}

/// Where to find a record and what it must contain.
#[derive(Debug, Clone, Copy)]
pub struct RecordRequest<'a> {
    /// The declared path, compared byte for byte with the record.
    pub path: &'a [u8],
    /// Absolute offset, or `None` to continue from the current position.
    pub offset: Option<u64>,
    /// Size of the content extent.
    pub extent: u64,
}

/// An open archive and its read cursor.
#[derive(Debug)]
pub struct ArchiveHandle<R = BufReader<File>> {
    reader: R,
    records_start: u64,
}

impl ArchiveHandle {
    pub fn open(path: &Path) -> Result<ArchiveHandle, ArchiveError> {
        let file = File::open(path).map_err(|e| ArchiveError::Open(e, path.to_path_buf()))?;
        ArchiveHandle::new(BufReader::new(file)).map_err(|e| ArchiveError::Open(e, path.to_path_buf()))
    }
}

impl<R: BufRead + Seek> ArchiveHandle<R> {
    /// Wraps a reader positioned at the start of an archive, consuming the
    /// preamble.
    pub fn new(mut reader: R) -> io::Result<ArchiveHandle<R>> {
        let mut preamble = vec![];
        reader.read_until(0, &mut preamble)?;
        let records_start = reader.stream_position()?;
        tracing::trace!(records_start, "skipped archive preamble");

        Ok(ArchiveHandle {
            reader,
            records_start,
        })
    }

    /// Offset just past the preamble.
    pub fn records_start(&self) -> u64 {
        self.records_start
    }

    /// Reads and validates one record, returning its raw content extent.
    ///
    /// On error the cursor is left wherever reading stopped.
    pub fn read_record(&mut self, request: &RecordRequest<'_>) -> Result<Vec<u8>, ArchiveError> {
        if let Some(offset) = request.offset {
            tracing::trace!(offset, "seeking");
            self.reader.seek(SeekFrom::Start(offset))?;
        }

        let found = self.reader.read_u16::<BigEndian>()?;
        if usize::from(found) != request.path.len() {
            return Err(ArchiveError::WrongPathLength {
                expected: request.path.len(),
                found,
            });
        }

        let mut path = Vec::with_capacity(request.path.len());
        (&mut self.reader)
            .take(u64::from(found))
            .read_to_end(&mut path)?;
        if path != request.path {
            return Err(ArchiveError::WrongPath {
                expected: request.path.escape_ascii().to_string(),
                found: path.escape_ascii().to_string(),
            });
        }

        let mut content = vec![];
        let read = (&mut self.reader)
            .take(request.extent)
            .read_to_end(&mut content)?;
        if read as u64 != request.extent {
            return Err(ArchiveError::UnexpectedEof);
        }

        Ok(content)
    }
}

/// Decompresses a compressed extent, which must come out at exactly `size`
/// bytes.
pub fn decompress_extent(
    codec: &dyn Codec,
    extent: &[u8],
    size: u64,
) -> Result<Vec<u8>, ArchiveError> {
    let content = codec.decompress(extent).map_err(ArchiveError::Decompress)?;
    if content.len() as u64 != size {
        return Err(ArchiveError::DecompressedSize {
            expected: size,
            actual: content.len() as u64,
        });
    }
    Ok(content)
}

/// Lazily opened archives, keyed by name and kept open for the whole run.
#[derive(Debug)]
pub struct ArchiveCache {
    base: PathBuf,
    handles: HashMap<String, ArchiveHandle>,
}

impl ArchiveCache {
    /// Archives are looked up in `base`, normally the directory of the IDB.
    pub fn new(base: impl Into<PathBuf>) -> ArchiveCache {
        ArchiveCache {
            base: base.into(),
            handles: HashMap::new(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns the handle for a reference, opening the archive on first use.
    ///
    /// The file named after the archive part of the reference is preferred;
    /// the full reference token is tried when it does not exist.
    pub fn handle(&mut self, reference: &ArchiveRef<'_>) -> Result<&mut ArchiveHandle, ArchiveError> {
        let candidates = [reference.name, reference.token];

        let key = match candidates.iter().find(|k| self.handles.contains_key(**k)) {
            Some(key) => *key,
            None => candidates
                .iter()
                .copied()
                .find(|k| self.base.join(k).is_file())
                .ok_or_else(|| ArchiveError::NotFound {
                    name: reference.name.to_string(),
                    dir: self.base.clone(),
                })?,
        };

        let handle = match self.handles.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.base.join(key);
                tracing::debug!(path = %path.display(), "opening archive");
                entry.insert(ArchiveHandle::open(&path)?)
            }
        };
        Ok(handle)
    }
}
