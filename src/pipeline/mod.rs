//! # Pipeline Module
//!
//! Orchestrates one scan of an evidence source: plan the regions to carve,
//! run them through the region workers, and record the outcome in the case
//! catalog.

pub mod engine;
pub mod workers;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, ScanRunRecord, catalog_path};
use crate::config::{Config, ScanMode};
use crate::evidence::{self, ByteSource};
use crate::partition::plan::{DiskLayout, inspect_disk};
use crate::partition::{CarveRegion, PartitionSelection, plan_regions};
use crate::scanner::{self, SignatureScanner, SignatureSet};

use workers::{SharedScan, run_region_workers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    CompletedWithWarnings,
    Aborted,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Completed => "completed",
            ScanStatus::CompletedWithWarnings => "completed_with_warnings",
            ScanStatus::Aborted => "aborted",
        }
    }
}

/// Status string stored when a scan stops on a fatal error.
pub const FAILED_STATUS: &str = "failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanWarning {
    pub region: Option<String>,
    pub offset: Option<u64>,
    pub message: String,
}

impl ScanWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            region: None,
            offset: None,
            message: message.into(),
        }
    }

    pub fn in_region(region: &CarveRegion, offset: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            region: Some(region.label.clone()),
            offset,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(region) = &self.region {
            write!(f, "{region}: ")?;
        }
        if let Some(offset) = self.offset {
            write!(f, "offset {offset}: ")?;
        }
        write!(f, "{}", self.message)
    }
}

/// Pipeline statistics collected during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub bytes_scanned: u64,
    pub chunks_processed: u64,
    pub hits_found: u64,
    pub files_carved: u64,
    /// Extractions whose bytes were already in the output directory.
    pub duplicates: u64,
    pub abandoned: u64,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.bytes_scanned += other.bytes_scanned;
        self.chunks_processed += other.chunks_processed;
        self.hits_found += other.hits_found;
        self.files_carved += other.files_carved;
        self.duplicates += other.duplicates;
        self.abandoned += other.abandoned;
    }
}

/// Cancellation between chunks. `cancel` comes from the operator; `halt` is
/// raised internally when one worker hits a fatal error.
#[derive(Debug, Clone, Default)]
pub struct StopFlags {
    pub cancel: Arc<AtomicBool>,
    pub halt: Arc<AtomicBool>,
}

impl StopFlags {
    pub fn with_cancel(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn should_stop(&self) -> bool {
        self.cancelled() || self.halt.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub selection: PartitionSelection,
    pub workers: usize,
    pub compute_evidence_sha256: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub case_id: String,
    pub status: ScanStatus,
    pub stats: ScanStats,
    pub warnings: Vec<ScanWarning>,
    pub regions: Vec<CarveRegion>,
    pub catalog_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Run a complete scan of `request.input` into `request.output_dir`.
///
/// Unreadable evidence and catalog failures are returned as errors; every
/// other problem becomes a warning on the outcome.
pub fn run_scan(
    cfg: &Config,
    config_hash: &str,
    request: &ScanRequest,
    stop: StopFlags,
) -> Result<ScanOutcome> {
    let started_at = Utc::now();
    std::fs::create_dir_all(&request.output_dir)
        .with_context(|| format!("create output dir {}", request.output_dir.display()))?;

    let mut source = evidence::open_source(&request.input)
        .with_context(|| format!("open evidence {}", request.input.display()))?;
    info!(
        "evidence {} ({}) len={}",
        request.input.display(),
        source.describe(),
        source.len()
    );

    let db_path = catalog_path(&request.output_dir, &cfg.case_id);
    let catalog = Arc::new(Catalog::open(&db_path, cfg.dedup).context("open catalog")?);

    let evidence_sha256 = if request.compute_evidence_sha256 {
        info!("computing evidence sha256 (full pass)");
        let hash = evidence::compute_sha256(&source, 8 * 1024 * 1024)
            .context("hash evidence")?;
        info!("evidence sha256={hash}");
        Some(hash)
    } else {
        None
    };
    let case = catalog
        .record_case(&cfg.case_id, &request.input, evidence_sha256.as_deref())
        .context("record case")?;
    if case.evidence_path != request.input.display().to_string() {
        warn!(
            "case {} was opened for {}; now scanning {}",
            case.case_id,
            case.evidence_path,
            request.input.display()
        );
    }

    let signatures = Arc::new(SignatureSet::from_config(cfg)?);
    let sig_scanner: Arc<dyn SignatureScanner> =
        Arc::from(scanner::build_signature_scanner(&signatures));

    let mut warnings = Vec::new();
    let regions = select_regions(cfg, &source, &request.selection, &mut warnings)
        .context("read partition table")?;
    source.close();

    let shared = Arc::new(SharedScan {
        input: request.input.clone(),
        output_dir: request.output_dir.clone(),
        signatures,
        scanner: sig_scanner,
        catalog: catalog.clone(),
        chunk_size: cfg.chunk_size,
        lookahead_block: cfg.lookahead_block as usize,
        stop: stop.clone(),
    });
    let results = run_region_workers(shared, regions.clone(), request.workers);
    let _ = std::fs::remove_dir(request.output_dir.join(".staging"));

    let mut stats = ScanStats::default();
    let mut aborted = false;
    let mut fatal = None;
    for (region, result) in regions.iter().zip(results) {
        match result {
            Ok(report) => {
                stats.merge(&report.stats);
                warnings.extend(report.warnings);
                aborted |= report.aborted;
            }
            Err(err) => {
                error!("{}: {err:#}", region.label);
                if fatal.is_none() {
                    fatal = Some(err.context(format!("carving {}", region.label)));
                }
            }
        }
    }
    aborted |= stop.cancelled();

    let finished_at = Utc::now();
    let status = if aborted {
        ScanStatus::Aborted
    } else if warnings.is_empty() {
        ScanStatus::Completed
    } else {
        ScanStatus::CompletedWithWarnings
    };
    let run = ScanRunRecord {
        started_at,
        finished_at,
        status: if fatal.is_some() {
            FAILED_STATUS.to_string()
        } else {
            status.as_str().to_string()
        },
        warnings: warnings.iter().map(|w| w.to_string()).collect(),
        artifacts_carved: stats.files_carved,
        config_hash: config_hash.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(err) = catalog.record_scan_run(&run) {
        if fatal.is_none() {
            return Err(err).context("record scan run");
        }
        warn!("failed to record scan run: {err}");
    }
    if let Some(err) = fatal {
        return Err(err);
    }

    info!(
        "run_summary status={} bytes_scanned={} chunks_processed={} hits_found={} files_carved={} duplicates={} abandoned={} warnings={}",
        status.as_str(),
        stats.bytes_scanned,
        stats.chunks_processed,
        stats.hits_found,
        stats.files_carved,
        stats.duplicates,
        stats.abandoned,
        warnings.len()
    );

    Ok(ScanOutcome {
        case_id: cfg.case_id.clone(),
        status,
        stats,
        warnings,
        regions,
        catalog_path: db_path,
        started_at,
        finished_at,
    })
}

/// Decide which byte ranges to carve. Decode problems become warnings; only
/// a failing read of the medium is an error.
pub fn select_regions(
    cfg: &Config,
    source: &ByteSource,
    selection: &PartitionSelection,
    warnings: &mut Vec<ScanWarning>,
) -> Result<Vec<CarveRegion>, evidence::SourceError> {
    let mode = match (cfg.scan_mode, selection) {
        (ScanMode::Auto, PartitionSelection::Only(_)) => ScanMode::Partitions,
        (mode, _) => mode,
    };
    if mode == ScanMode::Whole {
        return Ok(vec![CarveRegion::whole(source.len())]);
    }

    let layout = inspect_disk(source, cfg.sector_size)?;
    if mode == ScanMode::Auto && !layout.is_partitioned() {
        if let Err(err) = &layout.table {
            warnings.push(ScanWarning::new(format!("partition table: {err}")));
        }
        info!("no partition table found; carving the whole source");
        return Ok(vec![CarveRegion::whole(source.len())]);
    }
    let regions = partition_regions(&layout, selection, warnings);
    if mode == ScanMode::Auto && regions.is_empty() {
        warnings.push(ScanWarning::new(
            "no partition yielded a carvable region; carving the whole source",
        ));
        return Ok(vec![CarveRegion::whole(source.len())]);
    }
    Ok(regions)
}

fn partition_regions(
    layout: &DiskLayout,
    selection: &PartitionSelection,
    warnings: &mut Vec<ScanWarning>,
) -> Vec<CarveRegion> {
    let plan = plan_regions(layout, selection);
    warnings.extend(plan.notes.into_iter().map(ScanWarning::new));
    plan.regions
}
