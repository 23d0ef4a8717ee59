use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Carve an evidence source into a case directory
    Scan(ScanArgs),
    /// Print the partition table and filesystem boot sectors
    Partitions(PartitionsArgs),
    /// Regenerate the JSON report of an existing case
    Report(ReportArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Input image (raw, E01, or device)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory for carved files, catalog and report
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Case identifier (generated when neither this nor the config sets one)
    #[arg(long)]
    pub case_id: Option<String>,

    /// Carve only these partition indices (comma-separated, 1-4)
    #[arg(long, value_delimiter = ',', conflicts_with = "whole")]
    pub partitions: Option<Vec<u8>>,

    /// Ignore the partition table and carve the whole source
    #[arg(long)]
    pub whole: bool,

    /// Number of region workers
    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,

    /// Chunk size, in KiB (overrides config when set)
    #[arg(long)]
    pub chunk_size_kib: Option<u64>,

    /// Reject artefacts whose hash is already catalogued
    #[arg(long)]
    pub strict_dedup: bool,

    /// Compute evidence SHA-256 before scanning (extra full pass)
    #[arg(long)]
    pub compute_evidence_sha256: bool,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PartitionsArgs {
    /// Input image (raw, E01, or device)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Sector size in bytes
    #[arg(long, default_value_t = 512)]
    pub sector_size: u64,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Case output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Case identifier
    #[arg(long)]
    pub case_id: String,

    /// Include every carved file in the report
    #[arg(long)]
    pub include_files: bool,

    /// Report path (defaults to <output>/case_<case_id>_report.json)
    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
