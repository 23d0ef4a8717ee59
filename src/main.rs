use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use sectorsift::cli::{self, Command, PartitionsArgs, ReportArgs, ScanArgs};
use sectorsift::config::{self, DedupPolicy, ScanMode};
use sectorsift::partition::{FilesystemLayout, PartitionSelection};
use sectorsift::pipeline::{self, ScanRequest, StopFlags};
use sectorsift::{catalog, evidence, logging, partition, report};

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.log_json);

    match cli_opts.command {
        Command::Scan(args) => scan(args),
        Command::Partitions(args) => partitions(args),
        Command::Report(args) => regenerate_report(args),
    }
}

fn scan(args: ScanArgs) -> Result<()> {
    let loaded = config::load_config(args.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(case_id) = &args.case_id {
        cfg.case_id = case_id.trim().to_string();
    }
    if let Some(kib) = args.chunk_size_kib {
        cfg.chunk_size = kib.saturating_mul(1024);
    }
    if args.strict_dedup {
        cfg.dedup = DedupPolicy::Strict;
    }
    let selection = match &args.partitions {
        Some(list) => {
            cfg.scan_mode = ScanMode::Partitions;
            PartitionSelection::Only(list.clone())
        }
        None => PartitionSelection::All,
    };
    if args.whole {
        cfg.scan_mode = ScanMode::Whole;
    }
    config::validate(&cfg)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("install Ctrl+C handler")?;

    info!(
        "starting case_id={} input={} output={} workers={} chunk_size={} mode={:?} dedup={:?}",
        cfg.case_id,
        args.input.display(),
        args.output.display(),
        args.workers,
        cfg.chunk_size,
        cfg.scan_mode,
        cfg.dedup
    );

    let request = ScanRequest {
        input: args.input.clone(),
        output_dir: args.output.clone(),
        selection,
        workers: args.workers,
        compute_evidence_sha256: args.compute_evidence_sha256,
    };
    let outcome = pipeline::run_scan(
        &cfg,
        &loaded.config_hash,
        &request,
        StopFlags::with_cancel(cancel),
    )?;
    for warning in &outcome.warnings {
        warn!("{warning}");
    }

    let catalog = catalog::Catalog::open(&outcome.catalog_path, cfg.dedup)?;
    let case_report = report::build_report(&catalog, &cfg.case_id, Default::default())?;
    let report_path = report::default_report_path(&args.output, &cfg.case_id);
    report::write_report(&case_report, &report_path)?;

    println!("Scan {}: {}", outcome.status.as_str(), outcome.case_id);
    println!("Report generated: {}", report_path.display());
    println!("\nSummary:");
    for line in report::summary_lines(&case_report) {
        println!("{line}");
    }
    if !outcome.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &outcome.warnings {
            println!("- {warning}");
        }
    }
    Ok(())
}

fn partitions(args: PartitionsArgs) -> Result<()> {
    if args.sector_size == 0 {
        bail!("sector size must be greater than zero");
    }
    let mut source = evidence::open_source(&args.input)
        .with_context(|| format!("open evidence {}", args.input.display()))?;
    let layout = partition::plan::inspect_disk(&source, args.sector_size)?;
    source.close();

    if layout.volume_boot_record {
        println!("Sector 0 is a volume boot record; the source is a single volume");
    }
    let table = match &layout.table {
        Ok(table) => table,
        Err(err) => {
            println!("No partition table: {err}");
            return Ok(());
        }
    };
    if !table.has_boot_signature {
        println!("Warning: boot signature 0x55AA missing");
    }
    for entry in &table.entries {
        println!(
            "Partition {}: {} (0x{:02X}) start_sector={} sectors={}",
            entry.index,
            entry.kind().label(),
            entry.type_code,
            entry.start_sector,
            entry.sector_count
        );
    }
    for warning in table.check_bounds(layout.medium_len / layout.sector_size) {
        println!("Warning: {warning}");
    }
    for probe in &layout.probes {
        match &probe.filesystem {
            Ok(fs) => {
                let detail = match fs.layout {
                    FilesystemLayout::Ntfs { mft_cluster } => format!("NTFS mft_cluster={mft_cluster}"),
                    FilesystemLayout::Fat {
                        reserved_sectors,
                        fat_size_sectors,
                        fat_copies,
                    } => format!(
                        "FAT reserved={reserved_sectors} fat_size={fat_size_sectors} copies={fat_copies}"
                    ),
                };
                println!(
                    "  partition {}: {detail} bytes/sector={} sectors/cluster={} metadata_sector={} data_sector={}",
                    probe.entry.index,
                    fs.bytes_per_sector,
                    fs.sectors_per_cluster,
                    fs.metadata_area_sector,
                    fs.data_area_sector
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Err(err) => println!("  partition {}: {err}", probe.entry.index),
        }
    }
    Ok(())
}

fn regenerate_report(args: ReportArgs) -> Result<()> {
    let db_path = catalog::catalog_path(&args.output, &args.case_id);
    if !db_path.exists() {
        bail!("no catalog for case {} at {}", args.case_id, db_path.display());
    }
    let catalog = catalog::Catalog::open(&db_path, DedupPolicy::Audit)?;
    let case_report = report::build_report(
        &catalog,
        &args.case_id,
        report::ReportOptions {
            include_files: args.include_files,
        },
    )?;
    let report_path = args
        .report_path
        .unwrap_or_else(|| report::default_report_path(&args.output, &args.case_id));
    report::write_report(&case_report, &report_path)?;

    println!("Report generated: {}", report_path.display());
    println!("\nSummary:");
    for line in report::summary_lines(&case_report) {
        println!("{line}");
    }
    Ok(())
}
