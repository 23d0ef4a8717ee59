//! Partition-aware signature carver.
//!
//! An evidence source (flat image, device or E01 container) is split into
//! carve regions using its MBR and filesystem boot sectors. Every region is
//! scanned for file-type headers, and each match is delimited, extracted into a
//! content-addressed output directory and recorded in an append-only SQLite
//! catalog from which case reports are produced.

pub mod carve;
pub mod catalog;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod evidence;
pub mod logging;
pub mod partition;
pub mod pipeline;
pub mod report;
pub mod scanner;
