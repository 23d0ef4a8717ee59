use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::carve::{CarveContext, CarveError, ChunkWindow};
use crate::scanner::Signature;

/// Content-addressed output directory.
///
/// Bytes are streamed into a private staging file while hashed, synced, and
/// then renamed to `<md5>.<tag>`. When that name already exists the staged
/// copy is dropped, so identical content is stored once.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    staging_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub file_name: String,
    pub size: u64,
    /// False when a file with this name was already present.
    pub newly_written: bool,
}

impl ArtifactStore {
    /// `staging_label` must be unique per concurrent writer.
    pub fn open(output_dir: &Path, staging_label: &str) -> std::io::Result<Self> {
        let staging_dir = output_dir.join(".staging").join(staging_label);
        std::fs::create_dir_all(&staging_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            staging_dir,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn artifact_path(&self, content_hash: &str, extension: &str) -> PathBuf {
        self.output_dir.join(artifact_file_name(content_hash, extension))
    }

    /// Copy `[offset, offset + len)` of the medium into the store.
    pub fn extract(
        &self,
        sig: &Signature,
        offset: u64,
        len: u64,
        window: &ChunkWindow<'_>,
        ctx: &CarveContext<'_>,
    ) -> Result<StoredArtifact, CarveError> {
        let staged = self.staging_dir.join(format!("{offset:016x}.part"));
        let result = self.stage_and_commit(sig, offset, len, window, ctx, &staged);
        if result.is_err() {
            let _ = std::fs::remove_file(&staged);
        }
        result
    }

    fn stage_and_commit(
        &self,
        sig: &Signature,
        offset: u64,
        len: u64,
        window: &ChunkWindow<'_>,
        ctx: &CarveContext<'_>,
        staged: &Path,
    ) -> Result<StoredArtifact, CarveError> {
        let file = File::create(staged)?;
        let mut stream = CarveStream::new(file);

        let end = offset + len;
        let in_memory = window.slice(offset, end);
        stream.write_bytes(in_memory)?;

        let mut pos = offset + in_memory.len() as u64;
        let mut block = vec![0u8; ctx.lookahead_block.max(1)];
        while pos < end {
            let want = ((end - pos) as usize).min(block.len());
            let n = ctx.source.fill_at(pos, &mut block[..want])?;
            if n == 0 {
                return Err(CarveError::malformed(
                    sig,
                    offset,
                    format!("medium ended at {pos} during extraction"),
                ));
            }
            stream.write_bytes(&block[..n])?;
            pos += n as u64;
        }

        let (size, content_hash) = stream.finish()?;
        let file_name = artifact_file_name(&content_hash, &sig.extension());
        let final_path = self.output_dir.join(&file_name);
        let newly_written = if final_path.exists() {
            std::fs::remove_file(staged)?;
            false
        } else {
            std::fs::rename(staged, &final_path)?;
            true
        };

        Ok(StoredArtifact {
            content_hash,
            file_name,
            size,
            newly_written,
        })
    }

    /// Remove this writer's staging directory if nothing is left in it.
    pub fn release(&self) {
        let _ = std::fs::remove_dir(&self.staging_dir);
    }
}

pub fn artifact_file_name(content_hash: &str, extension: &str) -> String {
    format!("{content_hash}.{}", extension.to_ascii_lowercase())
}

struct CarveStream {
    writer: BufWriter<File>,
    md5: md5::Context,
    written: u64,
}

impl CarveStream {
    fn new(file: File) -> Self {
        Self {
            writer: BufWriter::new(file),
            md5: md5::Context::new(),
            written: 0,
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), CarveError> {
        self.writer.write_all(buf)?;
        self.md5.consume(buf);
        self.written = self.written.saturating_add(buf.len() as u64);
        Ok(())
    }

    fn finish(self) -> Result<(u64, String), CarveError> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| CarveError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok((self.written, format!("{:x}", self.md5.compute())))
    }
}
