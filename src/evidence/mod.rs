//! # Evidence Sources
//!
//! Uniform access to the medium under examination. A flat image or device and
//! an Expert Witness (`.E01`) container both expose the same positional
//! [`EvidenceSource`] interface; [`ByteSource`] layers a read cursor and an
//! explicit close on top of it.

#[cfg(feature = "ewf")]
pub mod ewf;
pub mod raw;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use raw::RawFileSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported evidence format: {0}")]
    UnsupportedFormat(String),
    #[error("container error: {0}")]
    Container(String),
    #[error("source is closed")]
    Closed,
}

impl SourceError {
    pub(crate) fn open(path: &Path, source: std::io::Error) -> Self {
        SourceError::Open {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub trait EvidenceSource: Send + Sync {
    fn len(&self) -> u64;
    /// Copy bytes starting at `offset` into `buf`. A short count is allowed;
    /// zero means `offset` is at or past the end of the medium.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError>;
    fn describe(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Raw,
    Ewf,
}

const RAW_EXTENSIONS: &[&str] = &["dd", "raw", "img", "bin", "iso", "001"];

/// Pick the reader for `path` from its extension. Paths without an extension
/// (block devices, `/dev/sdb`) are raw.
pub fn detect_kind(path: &Path) -> Result<SourceKind, SourceError> {
    let ext = match path.extension() {
        None => return Ok(SourceKind::Raw),
        Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
    };
    if RAW_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(SourceKind::Raw);
    }
    if ext == "e01" {
        return Ok(SourceKind::Ewf);
    }
    Err(SourceError::UnsupportedFormat(format!(
        "{} (extension .{ext})",
        path.display()
    )))
}

pub fn open_evidence(path: &Path) -> Result<Box<dyn EvidenceSource>, SourceError> {
    match detect_kind(path)? {
        SourceKind::Raw => Ok(Box::new(RawFileSource::open(path)?)),
        #[cfg(feature = "ewf")]
        SourceKind::Ewf => Ok(Box::new(ewf::EwfSource::open(path)?)),
        #[cfg(not(feature = "ewf"))]
        SourceKind::Ewf => Err(SourceError::UnsupportedFormat(format!(
            "{} (built without ewf support)",
            path.display()
        ))),
    }
}

pub fn open_source(path: &Path) -> Result<ByteSource, SourceError> {
    Ok(ByteSource::new(open_evidence(path)?))
}

/// Sequential reader over an evidence source.
///
/// `read` advances a cursor; `read_at` is positional and leaves the cursor
/// alone, which is what footer delimiting uses to look past the current
/// chunk. The underlying handle is released on `close` or drop.
pub struct ByteSource {
    inner: Option<Box<dyn EvidenceSource>>,
    position: u64,
    len: u64,
}

impl ByteSource {
    pub fn new(inner: Box<dyn EvidenceSource>) -> Self {
        let len = inner.len();
        Self {
            inner: Some(inner),
            position: 0,
            len,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn seek(&mut self, position: u64) -> Result<(), SourceError> {
        if self.inner.is_none() {
            return Err(SourceError::Closed);
        }
        self.position = position;
        Ok(())
    }

    /// Read up to `max_bytes` from the cursor. The result is shorter than
    /// requested only when the medium ends first, and empty only at the end.
    pub fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, SourceError> {
        if self.inner.is_none() {
            return Err(SourceError::Closed);
        }
        let remaining = self.len.saturating_sub(self.position);
        let want = (max_bytes as u64).min(remaining) as usize;
        let mut buf = vec![0u8; want];
        let filled = self.fill_at(self.position, &mut buf)?;
        buf.truncate(filled);
        self.position = self.position.saturating_add(filled as u64);
        Ok(buf)
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError> {
        let inner = self.inner.as_ref().ok_or(SourceError::Closed)?;
        inner.read_at(offset, buf)
    }

    /// Like `read_at` but keeps reading until `buf` is full or the medium ends.
    pub fn fill_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn describe(&self) -> &'static str {
        self.inner.as_ref().map(|s| s.describe()).unwrap_or("closed")
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSource")
            .field("kind", &self.describe())
            .field("position", &self.position)
            .field("len", &self.len)
            .finish()
    }
}

pub fn compute_sha256(source: &ByteSource, block: usize) -> Result<String, SourceError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; block.max(1)];
    let mut offset = 0u64;
    loop {
        let n = source.fill_at(offset, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        offset += n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}

/// In-memory source used by tests and by callers that already hold the bytes.
pub struct SliceSource {
    data: Vec<u8>,
}

impl SliceSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl EvidenceSource for SliceSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let to_copy = buf.len().min(self.data.len() - start);
        buf[..to_copy].copy_from_slice(&self.data[start..start + to_copy]);
        Ok(to_copy)
    }

    fn describe(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_fails_at_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.vmdk");
        std::fs::write(&path, b"data").expect("write");
        let err = open_source(&path).expect_err("unsupported");
        assert!(matches!(err, SourceError::UnsupportedFormat(_)));
    }

    #[test]
    fn detects_kinds_case_insensitively() {
        assert_eq!(detect_kind(Path::new("a/b.DD")).unwrap(), SourceKind::Raw);
        assert_eq!(detect_kind(Path::new("/dev/sdb")).unwrap(), SourceKind::Raw);
        assert_eq!(detect_kind(Path::new("case.E01")).unwrap(), SourceKind::Ewf);
    }

    #[test]
    fn missing_file_is_a_source_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = open_source(&dir.path().join("absent.dd")).expect_err("missing");
        assert!(matches!(err, SourceError::Open { .. }));
    }

    #[test]
    fn sequential_reads_shrink_at_end() {
        let mut src = ByteSource::new(Box::new(SliceSource::new(vec![7u8; 10])));
        assert_eq!(src.read(4).unwrap().len(), 4);
        assert_eq!(src.read(4).unwrap().len(), 4);
        assert_eq!(src.read(4).unwrap().len(), 2);
        assert!(src.read(4).unwrap().is_empty());
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let mut src = ByteSource::new(Box::new(SliceSource::new(vec![1u8; 8])));
        src.close();
        src.close();
        assert!(src.is_closed());
        assert!(matches!(src.read(1), Err(SourceError::Closed)));
    }

    #[test]
    fn sha256_of_slice_source() {
        let src = ByteSource::new(Box::new(SliceSource::new(b"abc".to_vec())));
        let hash = compute_sha256(&src, 2).expect("hash");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
