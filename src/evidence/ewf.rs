//! Expert Witness Compression Format (EWF-E01) reader.
//!
//! Only what carving needs is decoded: segment discovery, the volume
//! geometry and the chunk tables. Chunks are zlib-deflated or stored raw
//! with a trailing Adler-32; one decoded chunk is cached.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::read::ZlibDecoder;
use tracing::debug;

use crate::evidence::{EvidenceSource, SourceError};

const EVF_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];
const FILE_HEADER_LEN: u64 = 13;
const SECTION_DESCRIPTOR_LEN: u64 = 76;
const TABLE_HEADER_LEN: u64 = 24;
const MAX_TABLE_ENTRIES: u32 = 1 << 24;
const MAX_SECTIONS_PER_SEGMENT: usize = 1 << 20;
const COMPRESSED_FLAG: u32 = 0x8000_0000;
/// Deflate can grow incompressible data slightly past the chunk size.
const MAX_COMPRESSION_OVERHEAD: u64 = 1024;

#[derive(Debug, Clone)]
struct ChunkLocation {
    segment: usize,
    offset: u64,
    stored_size: u64,
    compressed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Geometry {
    chunk_count: u32,
    sectors_per_chunk: u32,
    bytes_per_sector: u32,
    sector_count: u32,
}

pub struct EwfSource {
    segments: Vec<Mutex<File>>,
    chunks: Vec<ChunkLocation>,
    chunk_size: usize,
    len: u64,
    cache: Mutex<Option<(usize, Arc<Vec<u8>>)>>,
}

impl EwfSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let paths = segment_paths(path)?;
        let mut segments = Vec::with_capacity(paths.len());
        let mut chunks = Vec::new();
        let mut geometry: Option<Geometry> = None;

        for (index, seg_path) in paths.iter().enumerate() {
            let file = File::open(seg_path).map_err(|e| SourceError::open(seg_path, e))?;
            let file = Mutex::new(file);
            let parsed = parse_segment(&file, index)?;
            debug!(
                "ewf segment {} ({}): {} chunks",
                parsed.number,
                seg_path.display(),
                parsed.chunks.len()
            );
            if geometry.is_none() {
                geometry = parsed.geometry;
            }
            chunks.extend(parsed.chunks);
            segments.push(file);
        }

        let geometry = geometry
            .ok_or_else(|| SourceError::Container("no volume section found".to_string()))?;
        let chunk_size = geometry.sectors_per_chunk as usize * geometry.bytes_per_sector as usize;
        if chunk_size == 0 {
            return Err(SourceError::Container("volume declares zero chunk size".to_string()));
        }
        let len = if geometry.sector_count > 0 {
            geometry.sector_count as u64 * geometry.bytes_per_sector as u64
        } else {
            geometry.chunk_count as u64 * chunk_size as u64
        };
        let addressable = chunks.len() as u64 * chunk_size as u64;
        if addressable < len {
            return Err(SourceError::Container(format!(
                "chunk tables cover {addressable} bytes but volume declares {len}"
            )));
        }

        Ok(Self {
            segments,
            chunks,
            chunk_size,
            len,
            cache: Mutex::new(None),
        })
    }

    fn load_chunk(&self, index: usize) -> Result<Arc<Vec<u8>>, SourceError> {
        {
            let cache = self.lock_cache()?;
            if let Some((cached, data)) = cache.as_ref() {
                if *cached == index {
                    return Ok(data.clone());
                }
            }
        }

        let loc = self
            .chunks
            .get(index)
            .ok_or_else(|| SourceError::Container(format!("chunk {index} out of range")))?;
        let data = if loc.compressed {
            if loc.stored_size > self.chunk_size as u64 + MAX_COMPRESSION_OVERHEAD {
                return Err(SourceError::Container(format!(
                    "chunk {index} stores {} bytes for a {} byte chunk",
                    loc.stored_size, self.chunk_size
                )));
            }
            let mut stored = vec![0u8; loc.stored_size as usize];
            read_exact_at(&self.segments[loc.segment], loc.offset, &mut stored)?;
            let mut out = Vec::with_capacity(self.chunk_size);
            ZlibDecoder::new(&stored[..])
                .read_to_end(&mut out)
                .map_err(|e| SourceError::Container(format!("chunk {index} inflate: {e}")))?;
            out
        } else {
            let mut out = vec![0u8; self.chunk_size];
            read_exact_at(&self.segments[loc.segment], loc.offset, &mut out)?;
            out
        };

        let data = Arc::new(data);
        *self.lock_cache()? = Some((index, data.clone()));
        Ok(data)
    }

    fn lock_cache(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Option<(usize, Arc<Vec<u8>>)>>, SourceError> {
        self.cache
            .lock()
            .map_err(|_| SourceError::Container("chunk cache lock poisoned".to_string()))
    }
}

impl EvidenceSource for EwfSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError> {
        if offset >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let index = (offset / self.chunk_size as u64) as usize;
        let within = (offset % self.chunk_size as u64) as usize;
        let chunk = self.load_chunk(index)?;
        if within >= chunk.len() {
            return Err(SourceError::Container(format!(
                "chunk {index} holds {} bytes, needed offset {within}",
                chunk.len()
            )));
        }
        let n = buf
            .len()
            .min(chunk.len() - within)
            .min((self.len - offset) as usize);
        buf[..n].copy_from_slice(&chunk[within..within + n]);
        Ok(n)
    }

    fn describe(&self) -> &'static str {
        "ewf"
    }
}

struct ParsedSegment {
    number: u16,
    geometry: Option<Geometry>,
    chunks: Vec<ChunkLocation>,
}

fn parse_segment(file: &Mutex<File>, index: usize) -> Result<ParsedSegment, SourceError> {
    let mut header = [0u8; FILE_HEADER_LEN as usize];
    read_exact_at(file, 0, &mut header)?;
    if header[..8] != EVF_SIGNATURE {
        return Err(SourceError::Container("missing EVF signature".to_string()));
    }
    if header[8] != 1 || header[11..13] != [0, 0] {
        return Err(SourceError::Container("invalid segment header fields".to_string()));
    }
    let number = u16::from_le_bytes([header[9], header[10]]);

    let mut geometry = None;
    let mut entries: Vec<(u64, bool)> = Vec::new();
    let mut sectors_end: Option<u64> = None;
    let mut offset = FILE_HEADER_LEN;

    for _ in 0..MAX_SECTIONS_PER_SEGMENT {
        let mut desc = [0u8; SECTION_DESCRIPTOR_LEN as usize];
        read_exact_at(file, offset, &mut desc)?;
        let kind: String = desc[..16]
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        let next = le_u64(&desc[16..24]);
        let size = le_u64(&desc[24..32]);
        let body = offset + SECTION_DESCRIPTOR_LEN;

        match kind.as_str() {
            "volume" | "disk" => {
                let mut raw = [0u8; 20];
                read_exact_at(file, body, &mut raw)?;
                geometry = Some(Geometry {
                    chunk_count: le_u32(&raw[4..8]),
                    sectors_per_chunk: le_u32(&raw[8..12]),
                    bytes_per_sector: le_u32(&raw[12..16]),
                    sector_count: le_u32(&raw[16..20]),
                });
            }
            "sectors" => {
                sectors_end = Some(offset.saturating_add(size));
            }
            "table" => {
                entries.extend(parse_table(file, body)?);
            }
            _ => {}
        }

        if kind == "done" || next <= offset {
            break;
        }
        offset = next;
    }

    let mut chunks = Vec::with_capacity(entries.len());
    for (i, (chunk_offset, compressed)) in entries.iter().enumerate() {
        let end = match entries.get(i + 1) {
            Some((next_offset, _)) => *next_offset,
            None => sectors_end.unwrap_or(*chunk_offset),
        };
        if *compressed && end <= *chunk_offset {
            return Err(SourceError::Container(format!(
                "cannot size compressed chunk at {chunk_offset} in segment {number}"
            )));
        }
        chunks.push(ChunkLocation {
            segment: index,
            offset: *chunk_offset,
            stored_size: end.saturating_sub(*chunk_offset),
            compressed: *compressed,
        });
    }

    Ok(ParsedSegment {
        number,
        geometry,
        chunks,
    })
}

fn parse_table(file: &Mutex<File>, body: u64) -> Result<Vec<(u64, bool)>, SourceError> {
    let mut header = [0u8; TABLE_HEADER_LEN as usize];
    read_exact_at(file, body, &mut header)?;
    let count = le_u32(&header[0..4]);
    if count > MAX_TABLE_ENTRIES {
        return Err(SourceError::Container(format!("table declares {count} entries")));
    }
    let base = le_u64(&header[8..16]);

    let mut raw = vec![0u8; count as usize * 4];
    read_exact_at(file, body + TABLE_HEADER_LEN, &mut raw)?;
    raw.chunks_exact(4)
        .map(|entry| {
            let value = le_u32(entry);
            let offset = base
                .checked_add((value & !COMPRESSED_FLAG) as u64)
                .ok_or_else(|| {
                    SourceError::Container(format!("table entry overflows base offset {base}"))
                })?;
            Ok((offset, value & COMPRESSED_FLAG != 0))
        })
        .collect()
}

/// `image.E01` => `image.E01`, `image.E02`, ... while the files exist.
fn segment_paths(first: &Path) -> Result<Vec<PathBuf>, SourceError> {
    if !first.exists() {
        return Err(SourceError::open(
            first,
            std::io::Error::new(std::io::ErrorKind::NotFound, "segment not found"),
        ));
    }
    let name = first.to_string_lossy();
    let Some(prefix) = name.get(..name.len().saturating_sub(2)) else {
        return Ok(vec![first.to_path_buf()]);
    };
    let mut paths = vec![first.to_path_buf()];
    for n in 2..=99u32 {
        let candidate = PathBuf::from(format!("{prefix}{n:02}"));
        if !candidate.exists() {
            break;
        }
        paths.push(candidate);
    }
    Ok(paths)
}

fn read_exact_at(file: &Mutex<File>, offset: u64, buf: &mut [u8]) -> Result<(), SourceError> {
    let mut guard = file
        .lock()
        .map_err(|_| SourceError::Container("segment lock poisoned".to_string()))?;
    guard.seek(SeekFrom::Start(offset))?;
    guard.read_exact(buf)?;
    Ok(())
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}
