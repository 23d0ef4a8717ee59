//! Shared helpers for the integration tests: synthetic disk images and a
//! one-call scan runner.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use sectorsift::config::{self, Config, DedupPolicy, ScanMode};
use sectorsift::partition::PartitionSelection;
use sectorsift::pipeline::{self, ScanOutcome, ScanRequest, StopFlags};

pub const SECTOR: usize = 512;

pub fn insert_bytes(target: &mut Vec<u8>, offset: usize, data: &[u8]) {
    let end = offset + data.len();
    if end > target.len() {
        target.resize(end, 0u8);
    }
    target[offset..end].copy_from_slice(data);
}

/// JPEG-shaped span of `len` bytes: SOI marker, filler, EOI marker.
pub fn sample_jpeg(len: usize, fill: u8) -> Vec<u8> {
    let mut data = vec![fill; len];
    data[0..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    data[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    data
}

pub fn sample_png() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x0D]);
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&[0x00; 17]);
    data.extend_from_slice(b"IEND");
    data.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
    data
}

/// MBR with the given `(slot, type_code, start_sector, sector_count)` entries.
pub fn mbr(entries: &[(usize, u8, u32, u32)]) -> Vec<u8> {
    let mut out = vec![0u8; SECTOR];
    for &(slot, code, start, count) in entries {
        let base = 446 + slot * 16;
        out[base + 4] = code;
        out[base + 8..base + 12].copy_from_slice(&start.to_le_bytes());
        out[base + 12..base + 16].copy_from_slice(&count.to_le_bytes());
    }
    out[510] = 0x55;
    out[511] = 0xAA;
    out
}

pub fn fat16_boot_sector(sectors_per_cluster: u8, reserved: u16, copies: u8, fat_size: u16) -> Vec<u8> {
    let mut bs = vec![0u8; SECTOR];
    bs[3..11].copy_from_slice(b"MSDOS5.0");
    bs[11..13].copy_from_slice(&512u16.to_le_bytes());
    bs[13] = sectors_per_cluster;
    bs[14..16].copy_from_slice(&reserved.to_le_bytes());
    bs[16] = copies;
    bs[22..24].copy_from_slice(&fat_size.to_le_bytes());
    bs
}

pub fn ntfs_boot_sector(sectors_per_cluster: u8, mft_cluster: u64) -> Vec<u8> {
    let mut bs = vec![0u8; SECTOR];
    bs[3..11].copy_from_slice(b"NTFS    ");
    bs[11..13].copy_from_slice(&512u16.to_le_bytes());
    bs[13] = sectors_per_cluster;
    bs[48..56].copy_from_slice(&mft_cluster.to_le_bytes());
    bs
}

pub fn write_image(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write image");
    path
}

pub fn test_config(case_id: &str) -> (Config, String) {
    let loaded = config::load_config(None).expect("config");
    let mut cfg = loaded.config;
    cfg.case_id = case_id.to_string();
    (cfg, loaded.config_hash)
}

pub struct ScanSetup {
    pub config: Config,
    pub config_hash: String,
    pub selection: PartitionSelection,
    pub workers: usize,
    pub stop: StopFlags,
}

impl ScanSetup {
    pub fn new(case_id: &str) -> Self {
        let (config, config_hash) = test_config(case_id);
        Self {
            config,
            config_hash,
            selection: PartitionSelection::All,
            workers: 1,
            stop: StopFlags::default(),
        }
    }

    pub fn mode(mut self, mode: ScanMode) -> Self {
        self.config.scan_mode = mode;
        self
    }

    pub fn dedup(mut self, policy: DedupPolicy) -> Self {
        self.config.dedup = policy;
        self
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.config.chunk_size = bytes;
        self
    }

    pub fn only(mut self, partitions: &[u8]) -> Self {
        self.selection = PartitionSelection::Only(partitions.to_vec());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn run(&self, input: &Path, output: &Path) -> anyhow::Result<ScanOutcome> {
        let request = ScanRequest {
            input: input.to_path_buf(),
            output_dir: output.to_path_buf(),
            selection: self.selection.clone(),
            workers: self.workers,
            compute_evidence_sha256: false,
        };
        pipeline::run_scan(&self.config, &self.config_hash, &request, self.stop.clone())
    }
}

/// Carved artefact files in `output`, excluding the catalog and reports.
pub fn artefact_files(output: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(output)
        .expect("read output")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with("case_"))
        .collect();
    names.sort();
    names
}
