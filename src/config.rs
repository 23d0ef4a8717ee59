use std::path::Path;

use anyhow::{Result, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize, Clone)]
pub struct FileTypeConfig {
    pub id: String,
    pub header: String,
    #[serde(default)]
    pub footer: Option<String>,
    pub max_size: u64,
    #[serde(default)]
    pub family: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Carve partitions when a valid MBR is present, otherwise the whole source.
    Auto,
    Partitions,
    Whole,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Every extraction gets a catalog row; identical bytes are stored once.
    Audit,
    /// A second artefact with a known hash is rejected.
    Strict,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub case_id: String,
    pub chunk_size: u64,
    pub lookahead_block: u64,
    pub sector_size: u64,
    pub scan_mode: ScanMode,
    pub dedup: DedupPolicy,
    pub collapse_families: bool,
    pub file_types: Vec<FileTypeConfig>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.case_id.trim().is_empty() {
        config.case_id = generate_case_id();
    }
    validate(&config)?;

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunk_size == 0 {
        bail!("chunk_size must be greater than zero");
    }
    if config.lookahead_block == 0 {
        bail!("lookahead_block must be greater than zero");
    }
    if config.sector_size == 0 {
        bail!("sector_size must be greater than zero");
    }
    if config
        .case_id
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        bail!("case_id may not contain path separators: {}", config.case_id);
    }
    Ok(())
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_case_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}
