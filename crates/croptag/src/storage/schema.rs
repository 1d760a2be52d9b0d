//! `SQLite` schema definitions for the registration log.

/// SQL statement to create the registrations table.
pub const CREATE_REGISTRATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS registrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    session_id TEXT NOT NULL,
    crop_id TEXT NOT NULL,
    total_bags INTEGER NOT NULL,
    epc_count INTEGER NOT NULL,
    epcs TEXT NOT NULL,
    batch_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on timestamp for recent-first listing.
pub const CREATE_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_registrations_timestamp ON registrations(timestamp DESC)
";

/// SQL statement to create an index on `batch_hash` for resubmission checks.
pub const CREATE_HASH_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_registrations_hash ON registrations(batch_hash)
";

/// SQL statement to create an index on `crop_id` for filtering.
pub const CREATE_CROP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_registrations_crop ON registrations(crop_id)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_REGISTRATIONS_TABLE,
    CREATE_TIMESTAMP_INDEX,
    CREATE_HASH_INDEX,
    CREATE_CROP_INDEX,
    CREATE_METADATA_TABLE,
];
