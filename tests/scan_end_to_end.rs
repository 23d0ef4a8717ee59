mod common;

use sectorsift::catalog::{CarvedArtifact, Catalog};
use sectorsift::config::{DedupPolicy, ScanMode};
use sectorsift::partition::CarveRegion;
use sectorsift::pipeline::{ScanOutcome, ScanStatus};
use sectorsift::report::{self, ReportOptions};

use common::{
    ScanSetup, artefact_files, fat16_boot_sector, insert_bytes, mbr, ntfs_boot_sector,
    sample_jpeg, sample_png, write_image, SECTOR,
};

fn rows(outcome: &ScanOutcome) -> Vec<CarvedArtifact> {
    let catalog = Catalog::open(&outcome.catalog_path, DedupPolicy::Audit).expect("catalog");
    let mut rows = catalog.all().expect("rows");
    rows.sort_by_key(|r| r.source_offset);
    rows
}

/// 128-sector disk: FAT16 partition 1 (sectors 4..64, data area at 12) and
/// NTFS partition 2 (sectors 64..128). A JPEG sits in the FAT reserved area,
/// a PNG in the FAT data area and a JPEG inside the NTFS partition.
fn partitioned_disk() -> Vec<u8> {
    let mut disk = vec![0u8; 128 * SECTOR];
    insert_bytes(&mut disk, 0, &mbr(&[(0, 0x06, 4, 60), (1, 0x07, 64, 64)]));
    insert_bytes(&mut disk, 4 * SECTOR, &fat16_boot_sector(1, 2, 2, 3));
    insert_bytes(&mut disk, 6 * SECTOR, &sample_jpeg(200, 0x11));
    insert_bytes(&mut disk, 20 * SECTOR, &sample_png());
    insert_bytes(&mut disk, 64 * SECTOR, &ntfs_boot_sector(8, 4));
    insert_bytes(&mut disk, 80 * SECTOR, &sample_jpeg(600, 0x22));
    disk
}

#[test]
fn single_jpeg_in_small_buffer_yields_one_artefact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut data = vec![0u8; 1024];
    let jpeg = sample_jpeg(300, 0x11);
    insert_bytes(&mut data, 200, &jpeg);
    let input = write_image(dir.path(), "small.dd", &data);
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("scenario-a").run(&input, &output).expect("scan");
    assert_eq!(outcome.status, ScanStatus::Completed);
    assert_eq!(outcome.regions, vec![CarveRegion::whole(1024)]);

    let rows = rows(&outcome);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].file_type, "JPG");
    assert_eq!(rows[0].source_offset, 200);
    assert_eq!(rows[0].size, 300);
    assert_eq!(rows[0].content_hash, format!("{:x}", md5::compute(&jpeg)));

    let stored = std::fs::read(output.join(rows[0].file_name())).expect("artefact");
    assert_eq!(stored, jpeg);
    assert_eq!(artefact_files(&output), vec![rows[0].file_name()]);
}

#[test]
fn partitioned_disk_carves_data_areas_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "disk.img", &partitioned_disk());
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("parts")
        .workers(2)
        .run(&input, &output)
        .expect("scan");
    assert_eq!(outcome.status, ScanStatus::Completed);
    assert_eq!(outcome.regions.len(), 2);
    assert_eq!(outcome.regions[0].start, 12 * SECTOR as u64);
    assert_eq!(outcome.regions[1].start, 64 * SECTOR as u64);

    let rows = rows(&outcome);
    let found: Vec<(&str, u64)> = rows
        .iter()
        .map(|r| (r.file_type.as_str(), r.source_offset))
        .collect();
    assert_eq!(
        found,
        vec![("PNG", 20 * SECTOR as u64), ("JPG", 80 * SECTOR as u64)]
    );
    assert_eq!(rows[1].size, 600);
    assert!(rows[1].region.as_deref().unwrap_or_default().contains("NTFS"));
}

#[test]
fn explicit_partition_selection_limits_regions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "disk.img", &partitioned_disk());
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("only-2")
        .only(&[2])
        .run(&input, &output)
        .expect("scan");
    assert_eq!(outcome.regions.len(), 1);
    assert_eq!(outcome.regions[0].partition, Some(2));
    let rows = rows(&outcome);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].file_type, "JPG");
}

#[test]
fn selecting_an_empty_partition_is_a_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "disk.img", &partitioned_disk());
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("only-3")
        .only(&[3])
        .run(&input, &output)
        .expect("scan");
    assert_eq!(outcome.status, ScanStatus::CompletedWithWarnings);
    assert!(outcome.regions.is_empty());
    assert!(outcome.warnings[0].message.contains("partition 3"));
}

#[test]
fn whole_mode_ignores_partition_boundaries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "disk.img", &partitioned_disk());
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("whole")
        .mode(ScanMode::Whole)
        .run(&input, &output)
        .expect("scan");
    let tags: Vec<String> = rows(&outcome).into_iter().map(|r| r.file_type).collect();
    assert_eq!(tags, vec!["JPG", "PNG", "JPG"]);
}

#[test]
fn artefact_spanning_many_chunks_is_complete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut data = vec![0u8; 64 * 1024];
    let jpeg = sample_jpeg(20_000, 0x33);
    insert_bytes(&mut data, 1000, &jpeg);
    let input = write_image(dir.path(), "big.raw", &data);
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("big")
        .mode(ScanMode::Whole)
        .chunk_size(4096)
        .run(&input, &output)
        .expect("scan");
    assert_eq!(outcome.stats.chunks_processed, 16);
    let rows = rows(&outcome);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].size, 20_000);
    let stored = std::fs::read(output.join(rows[0].file_name())).expect("artefact");
    assert_eq!(stored, jpeg);
}

#[test]
fn footerless_text_is_clipped_at_end_of_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut data = vec![b' '; 4096];
    insert_bytes(&mut data, 3996, &[0xEF, 0xBB, 0xBF, b'h', b'i']);
    let input = write_image(dir.path(), "text.bin", &data);
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("txt").run(&input, &output).expect("scan");
    let rows = rows(&outcome);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].file_type, "TXT");
    assert_eq!(rows[0].size, 100);
}

fn duplicated_jpegs() -> Vec<u8> {
    let mut data = vec![0u8; 16 * 1024];
    let jpeg = sample_jpeg(256, 0x44);
    insert_bytes(&mut data, 0x1000, &jpeg);
    insert_bytes(&mut data, 0x3000, &jpeg);
    data
}

#[test]
fn strict_dedup_records_first_copy_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "dups.dd", &duplicated_jpegs());
    let output = dir.path().join("out");
    let setup = ScanSetup::new("strict").dedup(DedupPolicy::Strict);

    let first = setup.run(&input, &output).expect("scan");
    assert_eq!(first.stats.files_carved, 1);
    assert_eq!(first.stats.duplicates, 1);
    assert_eq!(rows(&first).len(), 1);
    assert_eq!(artefact_files(&output).len(), 1);

    let second = setup.run(&input, &output).expect("rescan");
    assert_eq!(second.stats.files_carved, 0);
    assert_eq!(second.stats.duplicates, 2);
    assert_eq!(rows(&second).len(), 1);
    assert_eq!(artefact_files(&output).len(), 1);
}

#[test]
fn audit_dedup_appends_rows_but_stores_bytes_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "dups.dd", &duplicated_jpegs());
    let output = dir.path().join("out");
    let setup = ScanSetup::new("audit");

    let first = setup.run(&input, &output).expect("scan");
    assert_eq!(first.stats.files_carved, 2);
    assert_eq!(rows(&first).len(), 2);
    setup.run(&input, &output).expect("rescan");
    assert_eq!(rows(&first).len(), 4);
    assert_eq!(artefact_files(&output).len(), 1);
}

#[test]
fn cancelled_scan_is_reported_aborted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "dups.dd", &duplicated_jpegs());
    let output = dir.path().join("out");
    let setup = ScanSetup::new("cancel");
    setup
        .stop
        .cancel
        .store(true, std::sync::atomic::Ordering::Relaxed);

    let outcome = setup.run(&input, &output).expect("scan");
    assert_eq!(outcome.status, ScanStatus::Aborted);
    assert!(rows(&outcome).is_empty());

    let catalog = Catalog::open(&outcome.catalog_path, DedupPolicy::Audit).expect("catalog");
    let run = catalog.latest_scan_run().expect("run").expect("recorded");
    assert_eq!(run.status, "aborted");
}

#[test]
fn short_source_in_partition_mode_completes_with_warnings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "tiny.dd", &[0u8; 100]);
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("tiny")
        .mode(ScanMode::Partitions)
        .run(&input, &output)
        .expect("scan");
    assert_eq!(outcome.status, ScanStatus::CompletedWithWarnings);
    assert!(outcome.regions.is_empty());
    assert!(outcome.warnings[0].message.contains("insufficient data"));
}

#[test]
fn unsupported_evidence_format_fails_to_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "disk.vmdk", &[0u8; 1024]);
    let err = ScanSetup::new("vmdk")
        .run(&input, &dir.path().join("out"))
        .expect_err("unsupported");
    assert!(format!("{err:#}").contains("unsupported evidence format"));
}

#[test]
fn report_reflects_scan_and_is_repeatable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_image(dir.path(), "disk.img", &partitioned_disk());
    let output = dir.path().join("out");
    let outcome = ScanSetup::new("rep").run(&input, &output).expect("scan");

    let catalog = Catalog::open(&outcome.catalog_path, DedupPolicy::Audit).expect("catalog");
    let first = report::build_report(&catalog, "rep", ReportOptions::default()).expect("report");
    let second = report::build_report(&catalog, "rep", ReportOptions::default()).expect("report");
    assert_eq!(first.total_files, 2);
    assert_eq!(first.file_type_summary, second.file_type_summary);
    assert_eq!(first.scan_status.as_deref(), Some("completed"));
    assert_eq!(first.evidence_file, input.display().to_string());

    let path = report::default_report_path(&output, "rep");
    report::write_report(&first, &path).expect("write");
    let value: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
    assert_eq!(value["case_id"], "rep");
    assert_eq!(value["total_files"], 2);
    assert_eq!(value["file_type_summary"][0]["file_type"], "JPG");
}

#[test]
fn bare_ntfs_volume_is_carved_as_whole_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut volume = vec![0u8; 256 * SECTOR];
    let mut boot = ntfs_boot_sector(8, 4);
    for (i, byte) in boot[446..510].iter_mut().enumerate() {
        *byte = 0x33u8.wrapping_add(i as u8);
    }
    boot[510] = 0x55;
    boot[511] = 0xAA;
    insert_bytes(&mut volume, 0, &boot);
    insert_bytes(&mut volume, 100 * SECTOR, &sample_jpeg(300, 0x55));
    let input = write_image(dir.path(), "volume.img", &volume);
    let output = dir.path().join("out");

    let outcome = ScanSetup::new("volume").run(&input, &output).expect("scan");
    assert_eq!(outcome.status, ScanStatus::Completed);
    assert_eq!(outcome.regions, vec![CarveRegion::whole(256 * SECTOR as u64)]);
    let rows = rows(&outcome);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_offset, 100 * SECTOR as u64);
    assert_eq!(rows[0].size, 300);
}
