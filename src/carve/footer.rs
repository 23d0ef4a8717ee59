use memchr::memmem;

use crate::carve::{CarveContext, CarveError, ChunkWindow};
use crate::scanner::Signature;

/// Search for `footer` from `offset` and return the span length up to the
/// footer's last byte.
///
/// The in-memory window is searched first. When the footer is not there the
/// search continues with positional reads past the window, carrying the last
/// `footer.len() - 1` bytes between blocks so a footer split across a read
/// boundary is still seen. The search never passes `offset + max_size` or the
/// region end.
pub fn find_footer_end(
    sig: &Signature,
    footer: &[u8],
    offset: u64,
    window: &ChunkWindow<'_>,
    ctx: &CarveContext<'_>,
) -> Result<u64, CarveError> {
    if footer.is_empty() {
        return Err(CarveError::malformed(sig, offset, "empty footer pattern"));
    }
    let limit = offset.saturating_add(sig.max_size).min(ctx.region_end);
    let footer_len = footer.len() as u64;

    let in_memory = window.slice(offset, limit);
    if let Some(pos) = memmem::find(in_memory, footer) {
        return Ok(pos as u64 + footer_len);
    }

    let mut pos = offset + in_memory.len() as u64;
    if pos >= limit {
        return Err(not_found(sig, offset, limit, ctx));
    }

    let keep = footer.len() - 1;
    let mut carry: Vec<u8> = tail(in_memory, keep).to_vec();
    let mut block = vec![0u8; ctx.lookahead_block.max(footer.len())];

    while pos < limit {
        let want = ((limit - pos) as usize).min(block.len());
        let n = ctx.source.fill_at(pos, &mut block[..want])?;
        if n == 0 {
            return Err(CarveError::malformed(
                sig,
                offset,
                format!("medium ended at {pos} before footer"),
            ));
        }

        let mut search = Vec::with_capacity(carry.len() + n);
        search.extend_from_slice(&carry);
        search.extend_from_slice(&block[..n]);

        if let Some(found) = memmem::find(&search, footer) {
            let footer_start = pos - carry.len() as u64 + found as u64;
            return Ok(footer_start + footer_len - offset);
        }

        carry = tail(&search, keep).to_vec();
        pos += n as u64;
    }

    Err(not_found(sig, offset, limit, ctx))
}

fn tail(buf: &[u8], keep: usize) -> &[u8] {
    &buf[buf.len().saturating_sub(keep)..]
}

fn not_found(sig: &Signature, offset: u64, limit: u64, ctx: &CarveContext<'_>) -> CarveError {
    let reason = if limit == ctx.region_end && limit - offset < sig.max_size {
        "region ended before footer".to_string()
    } else {
        format!("no footer within max_size {}", sig.max_size)
    };
    CarveError::malformed(sig, offset, reason)
}
