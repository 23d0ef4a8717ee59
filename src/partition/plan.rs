use serde::Serialize;
use tracing::{info, warn};

use crate::evidence::{ByteSource, SourceError};
use crate::partition::{
    DecodeError, FilesystemInfo, MBR_LEN, PartitionEntry, PartitionTable, is_volume_boot_record,
    parse_mbr, probe_filesystem,
};

/// Byte range of the medium handed to the carving engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarveRegion {
    pub label: String,
    pub partition: Option<u8>,
    pub start: u64,
    pub end: u64,
}

impl CarveRegion {
    pub fn whole(len: u64) -> Self {
        Self {
            label: "whole source".to_string(),
            partition: None,
            start: 0,
            end: len,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSelection {
    All,
    Only(Vec<u8>),
}

impl PartitionSelection {
    fn includes(&self, index: u8) -> bool {
        match self {
            PartitionSelection::All => true,
            PartitionSelection::Only(list) => list.contains(&index),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartitionProbe {
    pub entry: PartitionEntry,
    pub filesystem: Result<FilesystemInfo, DecodeError>,
}

#[derive(Debug, Clone)]
pub struct DiskLayout {
    pub medium_len: u64,
    pub sector_size: u64,
    pub table: Result<PartitionTable, DecodeError>,
    /// Sector 0 is a FAT or NTFS boot sector, so the medium is one volume.
    pub volume_boot_record: bool,
    pub probes: Vec<PartitionProbe>,
}

impl DiskLayout {
    /// True when the first sector looks like a partitioned disk rather than a
    /// bare volume or arbitrary bytes.
    pub fn is_partitioned(&self) -> bool {
        if self.volume_boot_record {
            return false;
        }
        match &self.table {
            Ok(table) => table.has_boot_signature && table.populated().next().is_some(),
            Err(_) => false,
        }
    }
}

/// Read the boot record and every populated entry's boot sector.
///
/// Decode problems are kept in the returned layout; only a failing read of
/// the medium is an error.
pub fn inspect_disk(source: &ByteSource, sector_size: u64) -> Result<DiskLayout, SourceError> {
    let medium_len = source.len();
    let mut mbr = vec![0u8; MBR_LEN];
    let n = source.fill_at(0, &mut mbr)?;
    mbr.truncate(n);

    let table = parse_mbr(&mbr);
    let volume_boot_record = is_volume_boot_record(&mbr);
    if volume_boot_record {
        info!("sector 0 holds a volume boot record");
    }
    let mut probes = Vec::new();
    match &table {
        Ok(table) => {
            for entry in table.populated() {
                let boot_offset = entry.start_sector as u64 * sector_size;
                let mut boot = vec![0u8; sector_size as usize];
                let n = source.fill_at(boot_offset, &mut boot)?;
                boot.truncate(n);
                let filesystem = probe_filesystem(entry, &boot, boot_offset);
                if let Err(err) = &filesystem {
                    warn!("partition {}: {err}", entry.index);
                }
                probes.push(PartitionProbe {
                    entry: *entry,
                    filesystem,
                });
            }
            for warning in table.check_bounds(medium_len / sector_size) {
                warn!("{warning}");
            }
        }
        Err(err) => warn!("partition table: {err}"),
    }

    Ok(DiskLayout {
        medium_len,
        sector_size,
        table,
        volume_boot_record,
        probes,
    })
}

#[derive(Debug, Clone, Default)]
pub struct RegionPlan {
    pub regions: Vec<CarveRegion>,
    pub notes: Vec<String>,
}

/// Turn probed partitions into carve regions.
///
/// FAT regions start at the data area; every other populated entry is carved
/// from its first sector. Ranges are clipped to the medium.
pub fn plan_regions(layout: &DiskLayout, selection: &PartitionSelection) -> RegionPlan {
    let mut plan = RegionPlan::default();
    let table = match &layout.table {
        Ok(table) => table,
        Err(err) => {
            plan.notes.push(err.to_string());
            return plan;
        }
    };

    for warning in table.check_bounds(layout.medium_len / layout.sector_size) {
        plan.notes.push(warning.to_string());
    }

    if let PartitionSelection::Only(list) = selection {
        for index in list {
            match table.entry(*index) {
                Some(entry) if !entry.is_empty() => {}
                _ => plan
                    .notes
                    .push(format!("partition {index} requested but not populated")),
            }
        }
    }

    for probe in &layout.probes {
        let entry = &probe.entry;
        if !selection.includes(entry.index) {
            continue;
        }
        let start_sector = match &probe.filesystem {
            Ok(fs) => fs.data_area_sector.unwrap_or(entry.start_sector as u64),
            Err(err @ DecodeError::InsufficientData { .. }) => {
                plan.notes
                    .push(format!("partition {} skipped: {err}", entry.index));
                continue;
            }
            Err(err) => {
                plan.notes.push(format!("partition {}: {err}", entry.index));
                entry.start_sector as u64
            }
        };
        let start = start_sector.saturating_mul(layout.sector_size);
        let end = entry
            .end_sector()
            .saturating_mul(layout.sector_size)
            .min(layout.medium_len);
        if start >= end {
            plan.notes.push(format!(
                "partition {} has no carvable bytes (start {start}, end {end})",
                entry.index
            ));
            continue;
        }
        info!(
            "partition {} ({}) region {}..{}",
            entry.index,
            entry.kind().label(),
            start,
            end
        );
        plan.regions.push(CarveRegion {
            label: format!("partition {} ({})", entry.index, entry.kind().label()),
            partition: Some(entry.index),
            start,
            end,
        });
    }

    plan
}
