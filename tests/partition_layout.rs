mod common;

use sectorsift::evidence;
use sectorsift::partition::plan::inspect_disk;
use sectorsift::partition::{
    DecodeError, FilesystemLayout, PartitionKind, PartitionSelection, parse_mbr, plan_regions,
};

use common::{SECTOR, fat16_boot_sector, insert_bytes, mbr, ntfs_boot_sector, write_image};

#[test]
fn short_boot_record_is_insufficient_data() {
    let err = parse_mbr(&[0u8; 300]).expect_err("short");
    assert_eq!(
        err,
        DecodeError::InsufficientData {
            what: "master boot record",
            offset: 0,
            needed: 512,
            available: 300,
        }
    );
}

#[test]
fn ntfs_partition_at_sector_2048_is_decoded_from_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut disk = vec![0u8; (2048 + 256) * SECTOR];
    insert_bytes(&mut disk, 0, &mbr(&[(0, 0x07, 2048, 256)]));
    insert_bytes(&mut disk, 2048 * SECTOR, &ntfs_boot_sector(8, 16));
    let input = write_image(dir.path(), "ntfs.img", &disk);

    let mut source = evidence::open_source(&input).expect("open");
    let layout = inspect_disk(&source, 512).expect("inspect");
    source.close();

    let table = layout.table.as_ref().expect("table");
    assert!(table.has_boot_signature);
    assert_eq!(table.entries[0].kind(), PartitionKind::Ntfs);
    assert_eq!(layout.probes.len(), 1);

    let fs = layout.probes[0].filesystem.as_ref().expect("ntfs");
    assert_eq!(fs.layout, FilesystemLayout::Ntfs { mft_cluster: 16 });
    assert_eq!(fs.metadata_area_sector, 2048 + 16 * 8);
    assert_eq!(fs.data_area_sector, None);

    let plan = plan_regions(&layout, &PartitionSelection::All);
    assert!(plan.notes.is_empty());
    assert_eq!(plan.regions.len(), 1);
    assert_eq!(plan.regions[0].start, 2048 * SECTOR as u64);
    assert_eq!(plan.regions[0].end, (2048 + 256) * SECTOR as u64);
}

#[test]
fn fat_and_unsupported_partitions_are_planned_differently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut disk = vec![0u8; 256 * SECTOR];
    insert_bytes(
        &mut disk,
        0,
        &mbr(&[(0, 0x06, 8, 100), (1, 0x83, 108, 100), (2, 0x0C, 208, 100)]),
    );
    insert_bytes(&mut disk, 8 * SECTOR, &fat16_boot_sector(4, 4, 2, 10));
    let input = write_image(dir.path(), "mixed.dd", &disk);

    let source = evidence::open_source(&input).expect("open");
    let layout = inspect_disk(&source, 512).expect("inspect");
    assert!(layout.is_partitioned());

    let fat = layout.probes[0].filesystem.as_ref().expect("fat");
    assert_eq!(fat.metadata_area_sector, 12);
    assert_eq!(fat.data_area_sector, Some(32));
    assert!(matches!(
        layout.probes[1].filesystem,
        Err(DecodeError::UnsupportedFilesystem { index: 2, code: 0x83 })
    ));

    let plan = plan_regions(&layout, &PartitionSelection::All);
    let spans: Vec<(u64, u64)> = plan.regions.iter().map(|r| (r.start, r.end)).collect();
    assert_eq!(
        spans,
        vec![
            (32 * SECTOR as u64, 108 * SECTOR as u64),
            (108 * SECTOR as u64, 208 * SECTOR as u64),
            (208 * SECTOR as u64, 256 * SECTOR as u64),
        ]
    );
    assert!(plan.notes.iter().any(|n| n.contains("partition 3 ends at sector 308")));
}
