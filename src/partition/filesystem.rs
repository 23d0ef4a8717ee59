use serde::Serialize;

use crate::partition::{DecodeError, PartitionEntry, PartitionKind};

const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";
const NTFS_FIELDS_END: usize = 56;
const FAT_FIELDS_END: usize = 24;
const FAT32_FIELDS_END: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilesystemLayout {
    Ntfs {
        mft_cluster: u64,
    },
    Fat {
        reserved_sectors: u16,
        fat_size_sectors: u32,
        fat_copies: u8,
    },
}

/// Boot-sector geometry of one partition. Sector numbers are absolute on the
/// medium and counted in filesystem sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilesystemInfo {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    /// First MFT sector (NTFS) or first FAT sector (FAT family).
    pub metadata_area_sector: u64,
    /// Start of the cluster heap; NTFS does not need one to be carved.
    pub data_area_sector: Option<u64>,
    pub layout: FilesystemLayout,
}

impl FilesystemInfo {
    pub fn is_ntfs(&self) -> bool {
        matches!(self.layout, FilesystemLayout::Ntfs { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Ntfs,
    Fat,
}

/// Decode the filesystem boot sector of `entry`.
///
/// `boot_sector` holds the medium bytes starting at the entry's start sector
/// and `boot_offset` is their absolute byte offset, used for error context.
pub fn probe_filesystem(
    entry: &PartitionEntry,
    boot_sector: &[u8],
    boot_offset: u64,
) -> Result<FilesystemInfo, DecodeError> {
    match select_branch(entry, boot_sector)? {
        Branch::Ntfs => decode_ntfs(entry, boot_sector, boot_offset),
        Branch::Fat => decode_fat(entry, boot_sector, boot_offset),
    }
}

fn select_branch(entry: &PartitionEntry, boot_sector: &[u8]) -> Result<Branch, DecodeError> {
    let kind = entry.kind();
    match kind {
        PartitionKind::Empty => Err(DecodeError::EmptyPartition { index: entry.index }),
        PartitionKind::Ntfs => Ok(Branch::Ntfs),
        k if k.is_fat() => Ok(Branch::Fat),
        PartitionKind::Unknown(_) => {
            if boot_sector.get(3..11) == Some(&NTFS_OEM_ID[..]) {
                Ok(Branch::Ntfs)
            } else if plausible_fat_bpb(boot_sector) {
                Ok(Branch::Fat)
            } else {
                Err(unsupported(entry))
            }
        }
        _ => Err(unsupported(entry)),
    }
}

/// True when `sector` is a filesystem boot sector rather than a partition
/// table, as at the start of a bare volume image.
pub fn is_volume_boot_record(sector: &[u8]) -> bool {
    if sector.get(3..11) == Some(&NTFS_OEM_ID[..]) {
        return true;
    }
    matches!(sector.first(), Some(0xEB | 0xE9)) && plausible_fat_bpb(sector)
}

fn unsupported(entry: &PartitionEntry) -> DecodeError {
    DecodeError::UnsupportedFilesystem {
        index: entry.index,
        code: entry.type_code,
    }
}

fn plausible_fat_bpb(bs: &[u8]) -> bool {
    if bs.len() < FAT_FIELDS_END {
        return false;
    }
    let bytes_per_sector = u16::from_le_bytes([bs[11], bs[12]]);
    let sectors_per_cluster = bs[13];
    let reserved = u16::from_le_bytes([bs[14], bs[15]]);
    let fat_copies = bs[16];
    matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096)
        && sectors_per_cluster.is_power_of_two()
        && reserved > 0
        && (1..=4).contains(&fat_copies)
}

fn require(
    boot_sector: &[u8],
    needed: usize,
    what: &'static str,
    boot_offset: u64,
) -> Result<(), DecodeError> {
    if boot_sector.len() < needed {
        return Err(DecodeError::InsufficientData {
            what,
            offset: boot_offset,
            needed,
            available: boot_sector.len(),
        });
    }
    Ok(())
}

fn decode_ntfs(
    entry: &PartitionEntry,
    bs: &[u8],
    boot_offset: u64,
) -> Result<FilesystemInfo, DecodeError> {
    require(bs, NTFS_FIELDS_END, "ntfs boot sector", boot_offset)?;
    let bytes_per_sector = u16::from_le_bytes([bs[11], bs[12]]);
    let sectors_per_cluster = bs[13];
    let mut mft = [0u8; 8];
    mft.copy_from_slice(&bs[48..56]);
    let mft_cluster = u64::from_le_bytes(mft);

    let metadata_area_sector = (entry.start_sector as u64)
        .saturating_add(mft_cluster.saturating_mul(sectors_per_cluster as u64));

    Ok(FilesystemInfo {
        bytes_per_sector,
        sectors_per_cluster,
        metadata_area_sector,
        data_area_sector: None,
        layout: FilesystemLayout::Ntfs { mft_cluster },
    })
}

fn decode_fat(
    entry: &PartitionEntry,
    bs: &[u8],
    boot_offset: u64,
) -> Result<FilesystemInfo, DecodeError> {
    require(bs, FAT_FIELDS_END, "fat boot sector", boot_offset)?;
    let bytes_per_sector = u16::from_le_bytes([bs[11], bs[12]]);
    let sectors_per_cluster = bs[13];
    let reserved_sectors = u16::from_le_bytes([bs[14], bs[15]]);
    let fat_copies = bs[16];
    let fat_size16 = u16::from_le_bytes([bs[22], bs[23]]);

    // FAT32 leaves the 16-bit size zero and stores a 32-bit one at offset 36.
    let fat_size_sectors = if fat_size16 == 0 {
        require(bs, FAT32_FIELDS_END, "fat32 boot sector", boot_offset)?;
        u32::from_le_bytes([bs[36], bs[37], bs[38], bs[39]])
    } else {
        fat_size16 as u32
    };

    let metadata_area_sector = entry.start_sector as u64 + reserved_sectors as u64;
    let data_area_sector = metadata_area_sector + fat_size_sectors as u64 * fat_copies as u64;

    Ok(FilesystemInfo {
        bytes_per_sector,
        sectors_per_cluster,
        metadata_area_sector,
        data_area_sector: Some(data_area_sector),
        layout: FilesystemLayout::Fat {
            reserved_sectors,
            fat_size_sectors,
            fat_copies,
        },
    })
}
