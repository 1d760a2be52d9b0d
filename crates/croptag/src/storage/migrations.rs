//! Schema versioning for the registration log.
//!
//! The base tables come from [`SCHEMA_STATEMENTS`]; every later change is a
//! numbered step in [`MIGRATIONS`], applied in order inside a transaction.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Versioned schema changes. Version 1 is the base schema.
const MIGRATIONS: &[(i32, &str)] = &[
    (1, ""),
    (
        2,
        r"
        ALTER TABLE registrations ADD COLUMN crop_name TEXT;
        CREATE INDEX IF NOT EXISTS idx_registrations_status ON registrations(status);
        ",
    ),
];

/// Create the base schema and bring it up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if schema creation or a migration fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }
    if version < CURRENT_VERSION {
        run_migrations(conn, version)?;
    }
    Ok(())
}

/// Read the schema version, 0 for a fresh database.
///
/// # Errors
///
/// Returns an error if the stored version is not a number.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
        None => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn run_migrations(conn: &mut Connection, from_version: i32) -> Result<()> {
    let tx = conn.transaction()?;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > from_version) {
        if !sql.trim().is_empty() {
            tx.execute_batch(sql).map_err(|e| Error::DatabaseMigration {
                message: format!("migration to version {version} failed: {e}"),
            })?;
        }
        set_schema_version(&tx, *version)?;
    }
    tx.commit()?;

    info!(from = from_version, to = CURRENT_VERSION, "Registration log schema migrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn columns(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM pragma_table_info('registrations')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect()
    }

    #[test]
    fn test_initialize_schema_creates_tables() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).expect("failed to initialize schema");

        for table in ["registrations", "metadata"] {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "{table}");
        }
    }

    #[test]
    fn test_initialize_schema_sets_version() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).expect("first init failed");
        initialize_schema(&mut conn).expect("second init failed");
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_migration_adds_crop_name() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();
        assert!(columns(&conn).iter().any(|c| c == "crop_name"));
    }

    #[test]
    fn test_upgrade_from_version_one() {
        let mut conn = create_test_db();
        for statement in SCHEMA_STATEMENTS {
            conn.execute(statement, []).unwrap();
        }
        set_schema_version(&conn, 1).unwrap();
        assert!(!columns(&conn).iter().any(|c| c == "crop_name"));

        initialize_schema(&mut conn).unwrap();
        assert!(columns(&conn).iter().any(|c| c == "crop_name"));
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_fresh_db_version_zero() {
        let conn = create_test_db();
        conn.execute(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = initialize_schema(&mut conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_invalid_version_value() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();
        conn.execute(
            "UPDATE metadata SET value = 'abc' WHERE key = ?1",
            [VERSION_KEY],
        )
        .unwrap();

        assert!(schema_version(&conn).is_err());
    }

    #[test]
    fn test_migrations_are_ordered() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|(v, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
        assert_eq!(versions.last().copied(), Some(CURRENT_VERSION));
    }
}
