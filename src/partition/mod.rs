//! # Partition Tables
//!
//! Decodes the four primary entries of an MBR-style boot record and, per
//! entry, the filesystem boot sector needed to locate the data area.

pub mod filesystem;
pub mod plan;

use serde::Serialize;
use thiserror::Error;

pub use filesystem::{
    FilesystemInfo, FilesystemLayout, is_volume_boot_record, probe_filesystem,
};
pub use plan::{CarveRegion, PartitionSelection, plan_regions};

pub const MBR_LEN: usize = 512;
pub const PARTITION_TABLE_OFFSET: usize = 446;
pub const PARTITION_ENTRY_LEN: usize = 16;
pub const PARTITION_ENTRY_COUNT: usize = 4;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("insufficient data for {what} at offset {offset}: needed {needed} bytes, have {available}")]
    InsufficientData {
        what: &'static str,
        offset: u64,
        needed: usize,
        available: usize,
    },
    #[error("partition {index} is empty")]
    EmptyPartition { index: u8 },
    #[error("partition {index} (type {code:#04x}) holds no recognised filesystem")]
    UnsupportedFilesystem { index: u8, code: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartitionKind {
    Empty,
    Fat12,
    Fat16Small,
    Extended,
    Fat16,
    Ntfs,
    Fat32Chs,
    Fat32Lba,
    Fat16Lba,
    ExtendedLba,
    Linux,
    Unknown(u8),
}

impl PartitionKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => PartitionKind::Empty,
            0x01 => PartitionKind::Fat12,
            0x04 => PartitionKind::Fat16Small,
            0x05 => PartitionKind::Extended,
            0x06 => PartitionKind::Fat16,
            0x07 => PartitionKind::Ntfs,
            0x0B => PartitionKind::Fat32Chs,
            0x0C => PartitionKind::Fat32Lba,
            0x0E => PartitionKind::Fat16Lba,
            0x0F => PartitionKind::ExtendedLba,
            0x83 => PartitionKind::Linux,
            other => PartitionKind::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            PartitionKind::Empty => "Empty".to_string(),
            PartitionKind::Fat12 => "12-bit FAT".to_string(),
            PartitionKind::Fat16Small => "16-bit FAT".to_string(),
            PartitionKind::Extended => "Extended MS-DOS".to_string(),
            PartitionKind::Fat16 => "FAT-16".to_string(),
            PartitionKind::Ntfs => "NTFS".to_string(),
            PartitionKind::Fat32Chs => "FAT-32 (CHS)".to_string(),
            PartitionKind::Fat32Lba => "FAT-32 (LBA)".to_string(),
            PartitionKind::Fat16Lba => "FAT-16 (LBA)".to_string(),
            PartitionKind::ExtendedLba => "Extended (LBA)".to_string(),
            PartitionKind::Linux => "Linux".to_string(),
            PartitionKind::Unknown(code) => format!("Unknown ({code:#04x})"),
        }
    }

    pub fn is_fat(&self) -> bool {
        matches!(
            self,
            PartitionKind::Fat12
                | PartitionKind::Fat16Small
                | PartitionKind::Fat16
                | PartitionKind::Fat32Chs
                | PartitionKind::Fat32Lba
                | PartitionKind::Fat16Lba
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub index: u8,
    pub type_code: u8,
    pub start_sector: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn kind(&self) -> PartitionKind {
        PartitionKind::from_code(self.type_code)
    }

    pub fn is_empty(&self) -> bool {
        self.type_code == 0x00
    }

    pub fn end_sector(&self) -> u64 {
        self.start_sector as u64 + self.sector_count as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionTable {
    pub entries: [PartitionEntry; PARTITION_ENTRY_COUNT],
    pub has_boot_signature: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundsWarning {
    pub index: u8,
    pub end_sector: u64,
    pub medium_sectors: u64,
}

impl std::fmt::Display for BoundsWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "partition {} ends at sector {} beyond medium of {} sectors",
            self.index, self.end_sector, self.medium_sectors
        )
    }
}

impl PartitionTable {
    pub fn populated(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter().filter(|e| !e.is_empty())
    }

    pub fn entry(&self, index: u8) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.index == index)
    }

    /// Entries that run past the end of a medium of `medium_sectors` sectors.
    pub fn check_bounds(&self, medium_sectors: u64) -> Vec<BoundsWarning> {
        self.populated()
            .filter(|e| e.end_sector() > medium_sectors)
            .map(|e| BoundsWarning {
                index: e.index,
                end_sector: e.end_sector(),
                medium_sectors,
            })
            .collect()
    }
}

/// Decode the partition table from the first sector of the medium.
pub fn parse_mbr(sector: &[u8]) -> Result<PartitionTable, DecodeError> {
    if sector.len() < MBR_LEN {
        return Err(DecodeError::InsufficientData {
            what: "master boot record",
            offset: 0,
            needed: MBR_LEN,
            available: sector.len(),
        });
    }

    let entries = std::array::from_fn(|i| {
        let base = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_LEN;
        let raw = &sector[base..base + PARTITION_ENTRY_LEN];
        PartitionEntry {
            index: i as u8 + 1,
            type_code: raw[4],
            start_sector: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            sector_count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    });

    Ok(PartitionTable {
        entries,
        has_boot_signature: sector[510..512] == BOOT_SIGNATURE,
    })
}
