use memchr::memchr;

use crate::chunk::ScanChunk;
use crate::scanner::{Hit, SignatureScanner, SignatureSet};

#[derive(Debug, Clone)]
struct Pattern {
    signature: usize,
    bytes: Vec<u8>,
}

pub struct CpuScanner {
    patterns: Vec<Pattern>,
}

impl CpuScanner {
    pub fn new(signatures: &SignatureSet) -> Self {
        let patterns = signatures
            .iter()
            .enumerate()
            .filter(|(_, sig)| !sig.header.is_empty())
            .map(|(signature, sig)| Pattern {
                signature,
                bytes: sig.header.clone(),
            })
            .collect();
        Self { patterns }
    }
}

impl SignatureScanner for CpuScanner {
    /// Report every header occurrence starting inside the chunk's valid range.
    /// The cursor moves one byte past each match, so overlapping and nested
    /// headers are all reported.
    fn scan_chunk(&self, chunk: &ScanChunk, data: &[u8]) -> Vec<Hit> {
        let valid = (chunk.valid_length as usize).min(data.len());
        let mut hits = Vec::new();
        for pattern in &self.patterns {
            let first = pattern.bytes[0];
            let mut pos = 0usize;
            while pos < valid {
                let idx = match memchr(first, &data[pos..]) {
                    Some(i) => pos + i,
                    None => break,
                };
                if idx >= valid {
                    break;
                }
                if idx + pattern.bytes.len() <= data.len()
                    && data[idx..idx + pattern.bytes.len()] == pattern.bytes[..]
                {
                    hits.push(Hit {
                        chunk_id: chunk.id,
                        local_offset: idx as u64,
                        signature: pattern.signature,
                    });
                }
                pos = idx + 1;
            }
        }
        hits
    }
}
