//! # Carving
//!
//! Turns a header hit into a byte span (delimiting) and persists that span as
//! a content-addressed artefact file (extraction).

pub mod footer;
pub mod output;

use thiserror::Error;

use crate::evidence::{ByteSource, SourceError};
use crate::scanner::Signature;

pub use output::{ArtifactStore, StoredArtifact};

#[derive(Debug, Error)]
pub enum CarveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("evidence error: {0}")]
    Source(#[from] SourceError),
    #[error("malformed {type_tag} match at offset {offset}: {reason}")]
    MalformedSignatureMatch {
        type_tag: String,
        offset: u64,
        reason: String,
    },
}

impl CarveError {
    pub(crate) fn malformed(sig: &Signature, offset: u64, reason: impl Into<String>) -> Self {
        CarveError::MalformedSignatureMatch {
            type_tag: sig.type_tag.clone(),
            offset,
            reason: reason.into(),
        }
    }
}

/// Bytes of the current chunk already held in memory.
#[derive(Debug, Clone, Copy)]
pub struct ChunkWindow<'a> {
    pub start: u64,
    pub data: &'a [u8],
}

impl<'a> ChunkWindow<'a> {
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    /// In-memory bytes of `[from, to)`, clipped to the window.
    pub fn slice(&self, from: u64, to: u64) -> &'a [u8] {
        if from < self.start || from >= self.end() || to <= from {
            return &[];
        }
        let lo = (from - self.start) as usize;
        let hi = (to.min(self.end()) - self.start) as usize;
        &self.data[lo..hi]
    }
}

/// Where delimiting may look: the source, the end of the region being carved
/// and the size of each read past the in-memory window.
pub struct CarveContext<'a> {
    pub source: &'a ByteSource,
    pub region_end: u64,
    pub lookahead_block: usize,
}

/// Length in bytes of the artefact starting at `offset`.
///
/// Footer signatures span header start to footer end inclusive and must fit
/// within `max_size`; footer-less signatures take `max_size` bytes or
/// whatever remains of the region.
pub fn delimit(
    sig: &Signature,
    offset: u64,
    window: &ChunkWindow<'_>,
    ctx: &CarveContext<'_>,
) -> Result<u64, CarveError> {
    if offset >= ctx.region_end {
        return Err(CarveError::malformed(sig, offset, "hit outside region"));
    }
    match sig.footer.as_deref() {
        Some(footer) => footer::find_footer_end(sig, footer, offset, window, ctx),
        None => Ok(sig.max_size.min(ctx.region_end - offset)),
    }
}
