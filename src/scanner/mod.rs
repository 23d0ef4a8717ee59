pub mod cpu;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::chunk::ScanChunk;
use crate::config::{Config, FileTypeConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub type_tag: String,
    pub header: Vec<u8>,
    pub footer: Option<Vec<u8>>,
    pub max_size: u64,
}

impl Signature {
    pub fn extension(&self) -> String {
        self.type_tag.to_ascii_lowercase()
    }
}

/// Header occurrence inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub chunk_id: u64,
    pub local_offset: u64,
    pub signature: usize,
}

pub trait SignatureScanner: Send + Sync {
    fn scan_chunk(&self, chunk: &ScanChunk, data: &[u8]) -> Vec<Hit>;
}

/// Decoded signature table, built once from configuration.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    signatures: Vec<Signature>,
}

impl SignatureSet {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut decoded = Vec::with_capacity(cfg.file_types.len());
        for ft in &cfg.file_types {
            decoded.push((decode_file_type(ft)?, ft.family.clone()));
        }
        let signatures = if cfg.collapse_families {
            collapse_families(decoded)
        } else {
            decoded.into_iter().map(|(sig, _)| sig).collect()
        };
        for sig in &signatures {
            debug!(
                "signature {} header={} footer={} max_size={}",
                sig.type_tag,
                hex::encode(&sig.header),
                sig.footer.as_deref().map(hex::encode).unwrap_or_default(),
                sig.max_size
            );
        }
        Ok(Self { signatures })
    }

    pub fn get(&self, index: usize) -> Option<&Signature> {
        self.signatures.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn max_header_len(&self) -> usize {
        self.signatures
            .iter()
            .map(|s| s.header.len())
            .max()
            .unwrap_or(0)
    }
}

fn decode_file_type(ft: &FileTypeConfig) -> Result<Signature> {
    let header = decode_hex(&ft.header, &ft.id, "header")?;
    if header.is_empty() {
        return Err(anyhow!("empty header pattern for file_type {}", ft.id));
    }
    let footer = match ft.footer.as_deref() {
        Some(hex) if !hex.trim().is_empty() => Some(decode_hex(hex, &ft.id, "footer")?),
        _ => None,
    };
    if ft.max_size == 0 {
        return Err(anyhow!("max_size must be positive for file_type {}", ft.id));
    }
    Ok(Signature {
        type_tag: ft.id.to_ascii_uppercase(),
        header,
        footer,
        max_size: ft.max_size,
    })
}

fn decode_hex(value: &str, file_type: &str, kind: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim())
        .map_err(|e| anyhow!("invalid {kind} pattern for file_type {file_type}: {e}"))
}

/// Merge members of a family into one signature tagged with the family name.
///
/// Members merge only when their footers match and the shortest header is a
/// prefix of every other header; the merged signature keeps that header and
/// the largest `max_size`. Families that do not qualify stay separate.
fn collapse_families(decoded: Vec<(Signature, Option<String>)>) -> Vec<Signature> {
    enum Slot {
        Single(Signature),
        Family(String, Vec<Signature>),
    }

    let mut slots: Vec<Slot> = Vec::new();
    for (sig, family) in decoded {
        let Some(name) = family else {
            slots.push(Slot::Single(sig));
            continue;
        };
        let existing = slots.iter_mut().find_map(|slot| match slot {
            Slot::Family(f, members) if *f == name => Some(members),
            _ => None,
        });
        match existing {
            Some(members) => members.push(sig),
            None => slots.push(Slot::Family(name, vec![sig])),
        }
    }

    slots
        .into_iter()
        .flat_map(|slot| match slot {
            Slot::Single(sig) => vec![sig],
            Slot::Family(name, members) => merge_family(&name, members),
        })
        .collect()
}

fn merge_family(name: &str, members: Vec<Signature>) -> Vec<Signature> {
    if members.len() < 2 {
        return members;
    }
    let shortest = members
        .iter()
        .min_by_key(|s| s.header.len())
        .map(|s| s.header.clone())
        .unwrap_or_default();
    let footer = members[0].footer.clone();
    let compatible = members
        .iter()
        .all(|s| s.footer == footer && s.header.starts_with(&shortest));
    if !compatible {
        warn!("family {name} members differ in header/footer, carving them separately");
        return members;
    }
    let max_size = members.iter().map(|s| s.max_size).max().unwrap_or(0);
    vec![Signature {
        type_tag: name.to_ascii_uppercase(),
        header: shortest,
        footer,
        max_size,
    }]
}

pub fn build_signature_scanner(signatures: &SignatureSet) -> Box<dyn SignatureScanner> {
    Box::new(cpu::CpuScanner::new(signatures))
}
