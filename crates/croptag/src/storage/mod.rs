//! Registration log.
//!
//! Every submission that reached the backend is journaled to a local
//! `SQLite` database, whatever its outcome. The log answers "which batch
//! carried this tag?" at the packing station and flags batches that were
//! already registered once.

pub mod migrations;
pub mod schema;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::epc::Epc;
use crate::error::{Error, Result};
use crate::registration::{Receipt, RegistrationRequest, SubmitError};

/// How a logged submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// The backend registered the batch.
    Accepted,
    /// The backend answered with an error or `ok: false`.
    Rejected,
    /// The backend could not be reached.
    Failed,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RegistrationStatus {
    fn from_db(value: &str) -> Self {
        match value {
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "failed" => Self::Failed,
            other => {
                warn!("Unknown registration status: {}, treating as failed", other);
                Self::Failed
            }
        }
    }
}

/// One journaled submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Row id (assigned by storage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// When the submission completed.
    pub timestamp: DateTime<Utc>,
    /// Station or browser session identifier.
    pub session_id: String,
    /// Crop identifier.
    pub crop_id: String,
    /// Crop display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_name: Option<String>,
    /// Bag count entered on the form.
    pub total_bags: u32,
    /// Tags in scan order.
    pub epcs: Vec<Epc>,
    /// BLAKE3 fingerprint of the tag list.
    pub batch_hash: String,
    /// Outcome.
    pub status: RegistrationStatus,
    /// Message shown to the operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RegistrationRecord {
    /// Build a log entry for a submission attempt.
    ///
    /// Returns `None` for attempts that never reached the backend (invalid
    /// form, submission already in flight).
    #[must_use]
    pub fn from_attempt(
        request: &RegistrationRequest,
        result: &std::result::Result<Receipt, SubmitError>,
    ) -> Option<Self> {
        let (status, message) = match result {
            Ok(receipt) => (RegistrationStatus::Accepted, receipt.message.clone()),
            Err(SubmitError::Rejected { message }) => (RegistrationStatus::Rejected, message.clone()),
            Err(SubmitError::Transport { message }) => (RegistrationStatus::Failed, message.clone()),
            Err(SubmitError::Invalid(_) | SubmitError::InFlight) => return None,
        };

        Some(Self {
            id: None,
            timestamp: Utc::now(),
            session_id: request.session_id.clone(),
            crop_id: request.crop_id.clone(),
            crop_name: request.crop_name.clone(),
            total_bags: request.total_bags,
            epcs: request.epcs.clone(),
            batch_hash: request.batch_hash(),
            status,
            message: Some(message),
        })
    }

    /// Number of tags in the batch.
    #[must_use]
    pub fn epc_count(&self) -> usize {
        self.epcs.len()
    }
}

/// Storage engine for the registration log.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a registration log at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist
    /// and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening registration log at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&mut conn)?;

        info!("Registration log opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory log for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and return its id.
    ///
    /// An accepted batch whose fingerprint was already accepted before is
    /// still recorded, with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record(&self, record: &RegistrationRecord) -> Result<i64> {
        if record.status == RegistrationStatus::Accepted && self.is_registered(&record.batch_hash)? {
            warn!(
                crop_id = %record.crop_id,
                hash = record.batch_hash.get(..16).unwrap_or(&record.batch_hash),
                "Batch was already registered before"
            );
        }

        let epcs = serde_json::to_string(&record.epcs)?;
        let epc_count = i64::try_from(record.epc_count()).unwrap_or(i64::MAX);

        self.conn.execute(
            r"
            INSERT INTO registrations
                (timestamp, session_id, crop_id, crop_name, total_bags, epc_count,
                 epcs, batch_hash, status, message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                record.timestamp.to_rfc3339(),
                record.session_id,
                record.crop_id,
                record.crop_name,
                record.total_bags,
                epc_count,
                epcs,
                record.batch_hash,
                record.status.to_string(),
                record.message,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, status = %record.status, "Recorded registration");
        Ok(id)
    }

    /// Journal a submission attempt and apply the retention limit.
    ///
    /// Attempts that never reached the backend are skipped and return
    /// `Ok(None)`. A `max_records` of zero keeps everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn log_attempt(
        &self,
        request: &RegistrationRequest,
        result: &std::result::Result<Receipt, SubmitError>,
        max_records: usize,
    ) -> Result<Option<i64>> {
        let Some(record) = RegistrationRecord::from_attempt(request, result) else {
            return Ok(None);
        };
        let id = self.record(&record)?;
        if max_records > 0 {
            self.prune_keep_recent(max_records)?;
        }
        Ok(Some(id))
    }

    /// Whether a batch with this fingerprint was accepted before.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn is_registered(&self, batch_hash: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM registrations WHERE batch_hash = ?1 AND status = 'accepted'",
            [batch_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<RegistrationRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent records first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<RegistrationRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit_i64], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records whose batch contains `epc`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_by_epc(&self, epc: &Epc, limit: usize) -> Result<Vec<RegistrationRecord>> {
        let pattern = format!("%\"{epc}\"%");
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE epcs LIKE ?1 ORDER BY id DESC LIMIT ?2"
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![pattern, limit_i64], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Count all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM registrations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Keep only the most recent `keep_count` records.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_keep_recent(&self, keep_count: usize) -> Result<usize> {
        let keep_i64 = i64::try_from(keep_count).unwrap_or(i64::MAX);
        let affected = self.conn.execute(
            r"
            DELETE FROM registrations WHERE id NOT IN (
                SELECT id FROM registrations ORDER BY id DESC LIMIT ?1
            )
            ",
            [keep_i64],
        )?;

        if affected > 0 {
            info!("Pruned {} registration log entries to keep {}", affected, keep_count);
        }
        Ok(affected)
    }

    /// Get log statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let (total, accepted, bags): (i64, i64, i64) = self.conn.query_row(
            r"
            SELECT COUNT(*),
                   COALESCE(SUM(status = 'accepted'), 0),
                   COALESCE(SUM(CASE WHEN status = 'accepted' THEN epc_count ELSE 0 END), 0)
            FROM registrations
            ",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let newest: Option<String> = self
            .conn
            .query_row(
                "SELECT timestamp FROM registrations ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_registrations: total,
            accepted_registrations: accepted,
            registered_bags: bags,
            newest_registration: newest
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            db_size_bytes,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<RegistrationRecord> {
        let timestamp_str: String = row.get(1)?;
        let epcs_json: String = row.get(7)?;
        let status_str: String = row.get(9)?;

        let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
            .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

        let epcs: Vec<Epc> = serde_json::from_str(&epcs_json).unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable tag list in registration log");
            Vec::new()
        });

        Ok(RegistrationRecord {
            id: Some(row.get(0)?),
            timestamp,
            session_id: row.get(2)?,
            crop_id: row.get(3)?,
            crop_name: row.get(4)?,
            total_bags: row.get(5)?,
            epcs,
            batch_hash: row.get(8)?,
            status: RegistrationStatus::from_db(&status_str),
            message: row.get(10)?,
        })
    }
}

/// Column list shared by every record query; indexes match `row_to_record`.
const SELECT_COLUMNS: &str = r"
    SELECT id, timestamp, session_id, crop_id, crop_name, total_bags, epc_count,
           epcs, batch_hash, status, message
    FROM registrations
";

/// Statistics about the registration log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of logged submissions.
    pub total_registrations: i64,
    /// Submissions the backend accepted.
    pub accepted_registrations: i64,
    /// Bags across accepted submissions.
    pub registered_bags: i64,
    /// Timestamp of the newest entry.
    pub newest_registration: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
