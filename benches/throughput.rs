use std::fs::File;
use std::io::Write;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use sectorsift::chunk::ScanChunk;
use sectorsift::config::{self, ScanMode};
use sectorsift::partition::PartitionSelection;
use sectorsift::pipeline::{self, ScanRequest, StopFlags};
use sectorsift::scanner::{self, SignatureSet};

fn minimal_jpeg() -> Vec<u8> {
    let mut jpeg = vec![0u8; 32];
    jpeg[0..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    jpeg[4..9].copy_from_slice(b"JFIF\0");
    jpeg[30..32].copy_from_slice(&[0xFF, 0xD9]);
    jpeg
}

fn run_scan(input_path: &std::path::Path) -> pipeline::ScanStats {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let loaded = config::load_config(None).expect("config");
    let mut cfg = loaded.config;
    cfg.case_id = "bench".to_string();
    cfg.scan_mode = ScanMode::Whole;

    let request = ScanRequest {
        input: input_path.to_path_buf(),
        output_dir: temp_dir.path().join("out"),
        selection: PartitionSelection::All,
        workers: 1,
        compute_evidence_sha256: false,
    };
    pipeline::run_scan(&cfg, &loaded.config_hash, &request, StopFlags::default())
        .expect("scan")
        .stats
}

fn bench_scanner(c: &mut Criterion) {
    let cfg = config::load_config(None).expect("config").config;
    let signatures = SignatureSet::from_config(&cfg).expect("signatures");
    let sig_scanner = scanner::build_signature_scanner(&signatures);

    let mut group = c.benchmark_group("scanner");
    for size in [1024 * 1024usize, 8 * 1024 * 1024usize] {
        let mut data = vec![0u8; size];
        let jpeg = minimal_jpeg();
        for pos in (0..size - jpeg.len()).step_by(64 * 1024) {
            data[pos..pos + jpeg.len()].copy_from_slice(&jpeg);
        }
        let chunk = ScanChunk {
            id: 0,
            start: 0,
            length: size as u64,
            valid_length: size as u64,
        };
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("scan_chunk", size), &data, |b, data| {
            b.iter(|| sig_scanner.scan_chunk(&chunk, data));
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    for size in [8 * 1024 * 1024usize, 32 * 1024 * 1024usize] {
        group.bench_with_input(BenchmarkId::new("scan_only", size), &size, |b, &size| {
            b.iter(|| {
                let temp_dir = tempfile::tempdir().expect("tempdir");
                let input_path = temp_dir.path().join("image.bin");
                let file = File::create(&input_path).expect("create");
                file.set_len(size as u64).expect("set len");
                run_scan(&input_path);
            });
        });
    }

    group.bench_function("jpeg_dense", |b| {
        b.iter(|| {
            let temp_dir = tempfile::tempdir().expect("tempdir");
            let input_path = temp_dir.path().join("dense.bin");
            let mut file = File::create(&input_path).expect("create");
            let padding = vec![0u8; 32];
            for i in 0..500u32 {
                let mut jpeg = minimal_jpeg();
                jpeg[10..14].copy_from_slice(&i.to_le_bytes());
                file.write_all(&jpeg).expect("write");
                file.write_all(&padding).expect("write");
            }
            file.flush().expect("flush");
            run_scan(&input_path);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_scanner, bench_pipeline);
criterion_main!(benches);
