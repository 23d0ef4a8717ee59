//! # Artifact Catalog
//!
//! Append-only SQLite record of everything carved for one case. Each insert
//! runs in its own immediate transaction behind a mutex, so several region
//! workers may share one catalog. Triggers reject every UPDATE and DELETE on
//! the evidence tables.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::DedupPolicy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("artefact with md5 {0} already catalogued")]
    DuplicateHash(String),
    #[error("{field} value {value} does not fit the catalog")]
    OutOfRange { field: &'static str, value: u64 },
    #[error("corrupt catalog value in {field}: {value}")]
    Corrupt { field: &'static str, value: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record handed to [`Catalog::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    pub file_type: String,
    pub source_offset: u64,
    pub size: u64,
    pub content_hash: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarvedArtifact {
    pub id: i64,
    pub file_type: String,
    #[serde(rename = "offset")]
    pub source_offset: u64,
    pub size: u64,
    #[serde(rename = "md5")]
    pub content_hash: String,
    #[serde(rename = "recovery_time")]
    pub recovered_at: DateTime<Utc>,
    pub region: Option<String>,
}

impl CarvedArtifact {
    pub fn file_name(&self) -> String {
        crate::carve::output::artifact_file_name(&self.content_hash, &self.file_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSummary {
    pub file_type: String,
    pub file_count: u64,
    pub total_size: u64,
    pub largest_file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseInfo {
    pub case_id: String,
    pub evidence_path: String,
    pub evidence_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub warnings: Vec<String>,
    pub artifacts_carved: u64,
    pub config_hash: String,
    pub tool_version: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS carved_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_type TEXT NOT NULL,
    offset INTEGER NOT NULL,
    size INTEGER NOT NULL,
    md5 TEXT NOT NULL,
    recovery_time TEXT NOT NULL,
    region TEXT
);
CREATE INDEX IF NOT EXISTS carved_files_md5 ON carved_files(md5);

CREATE TABLE IF NOT EXISTS case_info (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    case_id TEXT NOT NULL,
    evidence_path TEXT NOT NULL,
    evidence_sha256 TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    status TEXT NOT NULL,
    warnings TEXT NOT NULL,
    artifacts_carved INTEGER NOT NULL,
    config_hash TEXT NOT NULL,
    tool_version TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS carved_files_no_update BEFORE UPDATE ON carved_files
BEGIN SELECT RAISE(ABORT, 'carved_files is append-only'); END;
CREATE TRIGGER IF NOT EXISTS carved_files_no_delete BEFORE DELETE ON carved_files
BEGIN SELECT RAISE(ABORT, 'carved_files is append-only'); END;
CREATE TRIGGER IF NOT EXISTS scan_runs_no_update BEFORE UPDATE ON scan_runs
BEGIN SELECT RAISE(ABORT, 'scan_runs is append-only'); END;
CREATE TRIGGER IF NOT EXISTS scan_runs_no_delete BEFORE DELETE ON scan_runs
BEGIN SELECT RAISE(ABORT, 'scan_runs is append-only'); END;
";

pub struct Catalog {
    conn: Mutex<Connection>,
    policy: DedupPolicy,
    path: PathBuf,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Location of the catalog database for a case.
pub fn catalog_path(output_dir: &Path, case_id: &str) -> PathBuf {
    output_dir.join(format!("case_{case_id}.db"))
}

impl Catalog {
    pub fn open(path: &Path, policy: DedupPolicy) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("catalog {} journal_mode={mode}", path.display());
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy,
            path: path.to_path_buf(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-written row:
        // every write is a single transaction.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one artefact record and return its id.
    ///
    /// Under [`DedupPolicy::Strict`] a known hash is rejected with
    /// [`StoreError::DuplicateHash`] and nothing is written.
    pub fn insert(&self, artifact: &NewArtifact) -> Result<CarvedArtifact, StoreError> {
        self.insert_at(artifact, Utc::now())
    }

    fn insert_at(
        &self,
        artifact: &NewArtifact,
        recovered_at: DateTime<Utc>,
    ) -> Result<CarvedArtifact, StoreError> {
        let offset = to_sql_int("offset", artifact.source_offset)?;
        let size = to_sql_int("size", artifact.size)?;
        let recovered_at = truncate_to_micros(recovered_at);

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if self.policy == DedupPolicy::Strict && hash_exists(&tx, &artifact.content_hash)? {
            return Err(StoreError::DuplicateHash(artifact.content_hash.clone()));
        }
        tx.execute(
            "INSERT INTO carved_files (file_type, offset, size, md5, recovery_time, region)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artifact.file_type,
                offset,
                size,
                artifact.content_hash,
                format_time(&recovered_at),
                artifact.region,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(CarvedArtifact {
            id,
            file_type: artifact.file_type.clone(),
            source_offset: artifact.source_offset,
            size: artifact.size,
            content_hash: artifact.content_hash.clone(),
            recovered_at,
            region: artifact.region.clone(),
        })
    }

    pub fn contains_hash(&self, content_hash: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        hash_exists(&conn, content_hash)
    }

    /// True when a row names the file `<content_hash>.<file_type>`.
    pub fn contains_file(&self, content_hash: &str, file_type: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM carved_files WHERE md5 = ?1 AND file_type = ?2 LIMIT 1",
                params![content_hash, file_type],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Every record in insertion order.
    pub fn all(&self) -> Result<Vec<CarvedArtifact>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, file_type, offset, size, md5, recovery_time, region
             FROM carved_files ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, file_type, offset, size, md5, recovery_time, region) = row?;
            out.push(CarvedArtifact {
                id,
                file_type,
                source_offset: from_sql_int("offset", offset)?,
                size: from_sql_int("size", size)?,
                content_hash: md5,
                recovered_at: parse_time("recovery_time", &recovery_time)?,
                region,
            });
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM carved_files", [], |row| row.get(0))?;
        from_sql_int("count", n)
    }

    /// Per-type count, total size and largest size, ordered by type tag.
    pub fn summarize(&self) -> Result<Vec<TypeSummary>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT file_type, COUNT(*), SUM(size), MAX(size)
             FROM carved_files GROUP BY file_type ORDER BY file_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (file_type, count, total, largest) = row?;
            out.push(TypeSummary {
                file_type,
                file_count: from_sql_int("file_count", count)?,
                total_size: from_sql_int("total_size", total)?,
                largest_file_size: from_sql_int("largest_file_size", largest)?,
            });
        }
        Ok(out)
    }

    /// Earliest and latest recovery time, or `None` for an empty catalog.
    pub fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StoreError> {
        let conn = self.lock();
        let (min, max): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(recovery_time), MAX(recovery_time) FROM carved_files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((
                parse_time("recovery_time", &min)?,
                parse_time("recovery_time", &max)?,
            ))),
            _ => Ok(None),
        }
    }

    /// Store the case header once. A later call keeps the first record and
    /// only fills in a missing evidence hash.
    pub fn record_case(
        &self,
        case_id: &str,
        evidence_path: &Path,
        evidence_sha256: Option<&str>,
    ) -> Result<CaseInfo, StoreError> {
        {
            let mut conn = self.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT OR IGNORE INTO case_info (id, case_id, evidence_path, evidence_sha256, created_at)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                params![
                    case_id,
                    evidence_path.display().to_string(),
                    evidence_sha256,
                    format_time(&Utc::now()),
                ],
            )?;
            if let Some(hash) = evidence_sha256 {
                tx.execute(
                    "UPDATE case_info SET evidence_sha256 = ?1 WHERE id = 1 AND evidence_sha256 IS NULL",
                    params![hash],
                )?;
            }
            tx.commit()?;
        }
        self.case_info()?.ok_or(StoreError::Corrupt {
            field: "case_info",
            value: "missing after insert".to_string(),
        })
    }

    pub fn case_info(&self) -> Result<Option<CaseInfo>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT case_id, evidence_path, evidence_sha256, created_at FROM case_info WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((case_id, evidence_path, evidence_sha256, created_at)) => Ok(Some(CaseInfo {
                case_id,
                evidence_path,
                evidence_sha256,
                created_at: parse_time("created_at", &created_at)?,
            })),
            None => Ok(None),
        }
    }

    pub fn record_scan_run(&self, run: &ScanRunRecord) -> Result<i64, StoreError> {
        let warnings = serde_json::to_string(&run.warnings).map_err(|e| StoreError::Corrupt {
            field: "warnings",
            value: e.to_string(),
        })?;
        let carved = to_sql_int("artifacts_carved", run.artifacts_carved)?;
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO scan_runs
             (started_at, finished_at, status, warnings, artifacts_carved, config_hash, tool_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                format_time(&run.started_at),
                format_time(&run.finished_at),
                run.status,
                warnings,
                carved,
                run.config_hash,
                run.tool_version,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn latest_scan_run(&self) -> Result<Option<ScanRunRecord>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT started_at, finished_at, status, warnings, artifacts_carved, config_hash, tool_version
                 FROM scan_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((started, finished, status, warnings, carved, config_hash, tool_version)) = row
        else {
            return Ok(None);
        };
        let warnings: Vec<String> =
            serde_json::from_str(&warnings).map_err(|_| StoreError::Corrupt {
                field: "warnings",
                value: warnings.clone(),
            })?;
        Ok(Some(ScanRunRecord {
            started_at: parse_time("started_at", &started)?,
            finished_at: parse_time("finished_at", &finished)?,
            status,
            warnings,
            artifacts_carved: from_sql_int("artifacts_carved", carved)?,
            config_hash,
            tool_version,
        }))
    }
}

fn hash_exists(conn: &Connection, content_hash: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM carved_files WHERE md5 = ?1 LIMIT 1",
            params![content_hash],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn to_sql_int(field: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}

fn from_sql_int(field: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        field,
        value: value.to_string(),
    })
}

fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let micros = ts.timestamp_micros();
    DateTime::from_timestamp_micros(micros).unwrap_or(ts)
}

/// Fixed-width RFC 3339 so lexical order in SQL equals time order.
fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            field,
            value: value.to_string(),
        })
}
