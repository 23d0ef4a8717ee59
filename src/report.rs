//! # Case Report
//!
//! Read-only view of a catalog rendered as JSON. Building a report never
//! touches the catalog, so repeated runs differ only in `analysis_time`.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{CarvedArtifact, Catalog, StoreError, TypeSummary};

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub case_id: String,
    pub evidence_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_sha256: Option<String>,
    pub analysis_time: DateTime<Utc>,
    pub total_files: u64,
    pub file_type_summary: Vec<TypeSummary>,
    pub earliest_recovery_time: Option<DateTime<Utc>>,
    pub latest_recovery_time: Option<DateTime<Utc>>,
    pub scan_status: Option<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carved_files: Option<Vec<CarvedArtifact>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    /// Append every catalog row to the report.
    pub include_files: bool,
}

pub fn build_report(
    catalog: &Catalog,
    case_id: &str,
    options: ReportOptions,
) -> Result<CaseReport, StoreError> {
    let case = catalog.case_info()?;
    let file_type_summary = catalog.summarize()?;
    let total_files = file_type_summary.iter().map(|s| s.file_count).sum();
    let range = catalog.time_range()?;
    let run = catalog.latest_scan_run()?;
    let carved_files = if options.include_files {
        Some(catalog.all()?)
    } else {
        None
    };

    Ok(CaseReport {
        case_id: case
            .as_ref()
            .map(|c| c.case_id.clone())
            .unwrap_or_else(|| case_id.to_string()),
        evidence_file: case
            .as_ref()
            .map(|c| c.evidence_path.clone())
            .unwrap_or_default(),
        evidence_sha256: case.and_then(|c| c.evidence_sha256),
        analysis_time: Utc::now(),
        total_files,
        file_type_summary,
        earliest_recovery_time: range.map(|(earliest, _)| earliest),
        latest_recovery_time: range.map(|(_, latest)| latest),
        scan_status: run.as_ref().map(|r| r.status.clone()),
        warnings: run.map(|r| r.warnings).unwrap_or_default(),
        carved_files,
    })
}

pub fn default_report_path(output_dir: &Path, case_id: &str) -> PathBuf {
    output_dir.join(format!("case_{case_id}_report.json"))
}

pub fn write_report(report: &CaseReport, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("serialize report")?;
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("create report {}", path.display()))?;
    file.write_all(&json)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}

/// One line per file type, as printed after a scan.
pub fn summary_lines(report: &CaseReport) -> Vec<String> {
    report
        .file_type_summary
        .iter()
        .map(|row| {
            format!(
                "- {}: {} files, Total Size: {} bytes, Largest File: {} bytes",
                row.file_type, row.file_count, row.total_size, row.largest_file_size
            )
        })
        .collect()
}
