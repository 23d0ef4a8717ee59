/// Window over the medium. `length` includes the overlap tail that lets a
/// header straddling the boundary be matched; only hits starting before
/// `valid_length` belong to this chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanChunk {
    pub id: u64,
    pub start: u64,
    pub length: u64,
    pub valid_length: u64,
}

impl ScanChunk {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Lazily yields the chunks covering `[start, end)`.
#[derive(Debug, Clone)]
pub struct ChunkIter {
    next_start: u64,
    end: u64,
    chunk_size: u64,
    overlap: u64,
    id: u64,
}

impl ChunkIter {
    pub fn new(start: u64, end: u64, chunk_size: u64, overlap: u64) -> Self {
        Self {
            next_start: start,
            end: if chunk_size == 0 { start } else { end },
            chunk_size,
            overlap,
            id: 0,
        }
    }
}

impl Iterator for ChunkIter {
    type Item = ScanChunk;

    fn next(&mut self) -> Option<ScanChunk> {
        if self.next_start >= self.end {
            return None;
        }
        let remaining = self.end - self.next_start;
        let chunk = ScanChunk {
            id: self.id,
            start: self.next_start,
            length: remaining.min(self.chunk_size.saturating_add(self.overlap)),
            valid_length: remaining.min(self.chunk_size),
        };
        self.next_start = self.next_start.saturating_add(self.chunk_size);
        self.id += 1;
        Some(chunk)
    }
}
