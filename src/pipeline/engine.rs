//! # Region Carving
//!
//! Sequential carve of one region: read a chunk, find every header in it,
//! delimit and extract each candidate, then move on. Chunk N+1 is read only
//! after chunk N is fully processed, because delimiting may read ahead on the
//! same source.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::carve::{ArtifactStore, CarveContext, CarveError, ChunkWindow, delimit};
use crate::catalog::{Catalog, NewArtifact, StoreError};
use crate::chunk::{ChunkIter, ScanChunk};
use crate::evidence::{ByteSource, SourceError};
use crate::partition::CarveRegion;
use crate::scanner::{SignatureScanner, SignatureSet};

use super::{ScanStats, ScanWarning, StopFlags};

/// Shared, read-only inputs of a region carve.
pub struct CarveSettings<'a> {
    pub signatures: &'a SignatureSet,
    pub scanner: &'a dyn SignatureScanner,
    pub catalog: &'a Catalog,
    pub chunk_size: u64,
    pub lookahead_block: usize,
    pub stop: &'a StopFlags,
}

#[derive(Debug, Clone, Default)]
pub struct RegionReport {
    pub stats: ScanStats,
    pub warnings: Vec<ScanWarning>,
    /// The region was left early because a stop was requested.
    pub aborted: bool,
}

/// What happened to one header hit.
enum HitOutcome {
    Carved { duplicate: bool },
    Duplicate,
    Abandoned,
}

/// Carve `region` of `source` into `store`, recording each artefact.
///
/// A failed chunk read ends this region with a warning; a read failure while
/// delimiting or extracting only abandons that match. Catalog and output
/// directory failures are returned as errors.
pub fn carve_region(
    source: &mut ByteSource,
    region: &CarveRegion,
    store: &ArtifactStore,
    settings: &CarveSettings<'_>,
) -> Result<RegionReport> {
    let mut report = RegionReport::default();
    let overlap = settings.signatures.max_header_len().saturating_sub(1) as u64;
    let region_end = region.end.min(source.len());
    info!(
        "carving {} bytes {}..{} chunk_size={} overlap={}",
        region.label, region.start, region_end, settings.chunk_size, overlap
    );

    for chunk in ChunkIter::new(region.start, region_end, settings.chunk_size, overlap) {
        if settings.stop.should_stop() {
            info!("{}: stop requested at offset {}", region.label, chunk.start);
            report.aborted = true;
            break;
        }

        let data = match read_chunk(source, &chunk) {
            Ok(data) => data,
            Err(err) => {
                warn!("{}: chunk read failed at {}: {err}", region.label, chunk.start);
                report.warnings.push(ScanWarning::in_region(
                    region,
                    Some(chunk.start),
                    format!("chunk read failed, rest of region skipped: {err}"),
                ));
                break;
            }
        };
        if data.is_empty() {
            break;
        }
        report.stats.chunks_processed += 1;
        report.stats.bytes_scanned += chunk.valid_length.min(data.len() as u64);

        let mut hits = settings.scanner.scan_chunk(&chunk, &data);
        hits.sort_by_key(|h| (h.local_offset, h.signature));
        report.stats.hits_found += hits.len() as u64;

        let window = ChunkWindow {
            start: chunk.start,
            data: &data,
        };
        let ctx = CarveContext {
            source: &*source,
            region_end,
            lookahead_block: settings.lookahead_block,
        };

        for hit in hits {
            let offset = chunk.start + hit.local_offset;
            match carve_hit(hit.signature, offset, &window, &ctx, region, store, settings) {
                Ok(HitOutcome::Carved { duplicate }) => {
                    report.stats.files_carved += 1;
                    if duplicate {
                        report.stats.duplicates += 1;
                    }
                }
                Ok(HitOutcome::Duplicate) => report.stats.duplicates += 1,
                Ok(HitOutcome::Abandoned) => report.stats.abandoned += 1,
                Err(HitFailure::Read(err)) => {
                    warn!("{}: read failed while carving at {offset}: {err}", region.label);
                    report.stats.abandoned += 1;
                    report.warnings.push(ScanWarning::in_region(
                        region,
                        Some(offset),
                        format!("read failed, match abandoned: {err}"),
                    ));
                }
                Err(HitFailure::Fatal(err)) => return Err(err),
            }
        }
    }

    Ok(report)
}

enum HitFailure {
    Read(SourceError),
    Fatal(anyhow::Error),
}

fn carve_hit(
    signature: usize,
    offset: u64,
    window: &ChunkWindow<'_>,
    ctx: &CarveContext<'_>,
    region: &CarveRegion,
    store: &ArtifactStore,
    settings: &CarveSettings<'_>,
) -> Result<HitOutcome, HitFailure> {
    let Some(sig) = settings.signatures.get(signature) else {
        return Ok(HitOutcome::Abandoned);
    };

    let len = match delimit(sig, offset, window, ctx) {
        Ok(0) => return Ok(HitOutcome::Abandoned),
        Ok(len) => len,
        Err(err) => return abandon_or_fail(err),
    };

    let stored = match store.extract(sig, offset, len, window, ctx) {
        Ok(stored) => stored,
        Err(err) => return abandon_or_fail(err),
    };

    let record = NewArtifact {
        file_type: sig.type_tag.clone(),
        source_offset: offset,
        size: stored.size,
        content_hash: stored.content_hash.clone(),
        region: Some(region.label.clone()),
    };
    match settings.catalog.insert(&record) {
        Ok(artifact) => {
            debug!(
                "carved {} id={} offset={} size={} md5={}",
                artifact.file_type, artifact.id, offset, artifact.size, artifact.content_hash
            );
            Ok(HitOutcome::Carved {
                duplicate: !stored.newly_written,
            })
        }
        Err(StoreError::DuplicateHash(hash)) => {
            debug!("{} at {offset} duplicates md5 {hash}", sig.type_tag);
            // Rows for a rejected hash never change under strict dedup, so a
            // file no row names can be dropped safely.
            let referenced = settings
                .catalog
                .contains_file(&stored.content_hash, &sig.type_tag)
                .map_err(|e| HitFailure::Fatal(e.into()))?;
            if stored.newly_written && !referenced {
                let path = store.artifact_path(&stored.content_hash, &sig.type_tag);
                std::fs::remove_file(&path)
                    .with_context(|| format!("remove unrecorded {}", path.display()))
                    .map_err(HitFailure::Fatal)?;
            }
            Ok(HitOutcome::Duplicate)
        }
        Err(err) => Err(HitFailure::Fatal(
            anyhow::Error::new(err).context(format!("record {} at offset {offset}", sig.type_tag)),
        )),
    }
}

fn abandon_or_fail(err: CarveError) -> Result<HitOutcome, HitFailure> {
    match err {
        CarveError::MalformedSignatureMatch { .. } => {
            debug!("abandoned: {err}");
            Ok(HitOutcome::Abandoned)
        }
        CarveError::Source(source) => Err(HitFailure::Read(source)),
        CarveError::Io(io) => Err(HitFailure::Fatal(
            anyhow::Error::new(io).context("write artefact"),
        )),
    }
}

fn read_chunk(source: &mut ByteSource, chunk: &ScanChunk) -> Result<Vec<u8>, SourceError> {
    source.seek(chunk.start)?;
    source.read(chunk.length as usize)
}
