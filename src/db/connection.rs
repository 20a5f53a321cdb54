//! Opening SQLite connections and instantiating the schema.

use diesel::connection::SimpleConnection;
use diesel::migration::MigrationSource;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::sqlite::Sqlite;
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, FileBasedMigrations, MigrationHarness};
use log::{debug, info, warn};
use std::path::Path;
use std::time::Duration;

use crate::error::StoreError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(QueryableByName)]
struct TableCount {
    #[diesel(sql_type = BigInt)]
    tables: i64,
}

/// Open a connection with foreign keys enforced. Cascading deletes of a
/// day's children depend on this pragma, which SQLite resets per session.
pub fn connect(database: &str, busy_timeout: Duration) -> Result<SqliteConnection, StoreError> {
    let mut conn = SqliteConnection::establish(database)?;
    conn.batch_execute(&format!(
        "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
        busy_timeout.as_millis()
    ))?;
    debug!("Opened {} (busy_timeout={}ms)", database, busy_timeout.as_millis());
    Ok(conn)
}

/// Open an existing database file; a missing file is not created.
pub fn open_existing(path: &Path, busy_timeout: Duration) -> Result<SqliteConnection, StoreError> {
    if !path.is_file() {
        return Err(StoreError::not_found("database", path.display().to_string()));
    }
    connect(&path.to_string_lossy(), busy_timeout)
}

fn table_count(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let row: TableCount = diesel::sql_query(
        "SELECT COUNT(*) AS tables FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'",
    )
    .get_result(conn)?;
    Ok(row.tables)
}

/// Create every table in an empty database. Returns the applied migration
/// versions.
pub fn create_schema<S>(conn: &mut SqliteConnection, source: S) -> Result<Vec<String>, StoreError>
where
    S: MigrationSource<Sqlite>,
{
    let existing = table_count(conn)?;
    if existing > 0 {
        return Err(StoreError::AlreadyExists(format!(
            "schema ({} table(s) in target)",
            existing
        )));
    }
    let applied = conn
        .run_pending_migrations(source)
        .map_err(|e| StoreError::Schema(e.to_string()))?;
    let versions = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>();
    info!("Applied {} schema migration(s): {}", versions.len(), versions.join(", "));
    Ok(versions)
}

/// Create a new database file at `path` and apply the schema, either the
/// embedded one or the migrations found in `schema_dir`.
///
/// Refuses to touch an existing file. If applying the schema fails the
/// half-created file is removed again.
pub fn provision(path: &Path, schema_dir: Option<&Path>, busy_timeout: Duration) -> Result<Vec<String>, StoreError> {
    if path.exists() {
        return Err(StoreError::AlreadyExists(path.display().to_string()));
    }
    let external = match schema_dir {
        Some(dir) if !dir.is_dir() => {
            return Err(StoreError::MissingDependency(format!(
                "schema definition {} not found",
                dir.display()
            )));
        }
        Some(dir) => {
            let source = FileBasedMigrations::from_path(dir).map_err(|e| {
                StoreError::MissingDependency(format!("schema definition {}: {}", dir.display(), e))
            })?;
            let found = MigrationSource::<Sqlite>::migrations(&source)
                .map_err(|e| StoreError::Schema(format!("schema definition {}: {}", dir.display(), e)))?;
            if found.is_empty() {
                return Err(StoreError::MissingDependency(format!(
                    "schema definition {} has no migrations",
                    dir.display()
                )));
            }
            Some(source)
        }
        None => None,
    };

    let result = connect(&path.to_string_lossy(), busy_timeout).and_then(|mut conn| {
        let versions = match external {
            Some(source) => create_schema(&mut conn, source)?,
            None => create_schema(&mut conn, MIGRATIONS)?,
        };
        // Readers keep a consistent snapshot while a loader writes.
        conn.batch_execute("PRAGMA journal_mode = WAL;")?;
        Ok(versions)
    });

    if result.is_err() && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Could not remove partially created {}: {}", path.display(), e);
        }
    }
    result
}

#[cfg(test)]
pub(crate) fn test_connection() -> SqliteConnection {
    let mut conn = connect(":memory:", Duration::from_millis(100)).expect("open in-memory database");
    create_schema(&mut conn, MIGRATIONS).expect("apply schema");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_to_empty_database() {
        let mut conn = connect(":memory:", Duration::from_millis(100)).unwrap();
        let versions = create_schema(&mut conn, MIGRATIONS).unwrap();
        assert_eq!(versions.len(), 1);
        // org, site, day, visit, block, dataload + diesel bookkeeping
        assert_eq!(table_count(&mut conn).unwrap(), 7);
    }

    #[test]
    fn schema_refuses_non_empty_database() {
        let mut conn = test_connection();
        let err = create_schema(&mut conn, MIGRATIONS).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)), "{}", err);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let mut conn = test_connection();
        let err = diesel::sql_query("INSERT INTO site (org_id, site_handle) VALUES (42, 'main')")
            .execute(&mut conn)
            .map_err(|e| StoreError::from_diesel("site", "42/main", e))
            .unwrap_err();
        assert!(err.is_constraint_violation(), "{}", err);
    }

    #[test]
    fn day_site_must_belong_to_day_org() {
        let mut conn = test_connection();
        conn.batch_execute(
            "INSERT INTO org (id, org_handle) VALUES (1, 'acme'), (2, 'other');
             INSERT INTO site (id, org_id, site_handle) VALUES (1, 1, 'main'), (2, 2, 'main');",
        )
        .unwrap();
        diesel::sql_query("INSERT INTO day (org_id, site_id, date) VALUES (1, 1, '2024-06-01')")
            .execute(&mut conn)
            .unwrap();
        let err = diesel::sql_query("INSERT INTO day (org_id, site_id, date) VALUES (1, 2, '2024-06-01')")
            .execute(&mut conn)
            .map_err(|e| StoreError::from_diesel("day", "acme/main/2024-06-01", e))
            .unwrap_err();
        assert!(err.is_constraint_violation(), "{}", err);
    }

    #[test]
    fn table_checks_are_structural_only() {
        let mut conn = test_connection();
        conn.batch_execute(
            "INSERT INTO org (id, org_handle) VALUES (1, 'acme');
             INSERT INTO site (id, org_id, site_handle) VALUES (1, 1, 'main');",
        )
        .unwrap();
        // Shape and lexical range pass although the month does not exist.
        diesel::sql_query("INSERT INTO day (org_id, site_id, date) VALUES (1, 1, '2024-13-40')")
            .execute(&mut conn)
            .unwrap();
        let bad_shape = diesel::sql_query("INSERT INTO day (org_id, site_id, date) VALUES (1, 1, '2024-6-1')")
            .execute(&mut conn);
        assert!(bad_shape.is_err());
        let out_of_range = diesel::sql_query("INSERT INTO day (org_id, site_id, date) VALUES (1, 1, '1999-12-31')")
            .execute(&mut conn);
        assert!(out_of_range.is_err());
    }

    #[test]
    fn provision_creates_file_and_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parking.db");
        let versions = provision(&path, None, Duration::from_millis(100)).unwrap();
        assert!(!versions.is_empty());
        assert!(path.is_file());

        let err = provision(&path, None, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)), "{}", err);
    }

    #[test]
    fn provision_reports_missing_schema_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parking.db");
        let missing = dir.path().join("no-such-migrations");
        let err = provision(&path, Some(&missing), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, StoreError::MissingDependency(_)), "{}", err);
        assert!(!path.exists());
    }

    #[test]
    fn provision_rejects_empty_schema_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parking.db");
        let empty = dir.path().join("migrations");
        std::fs::create_dir_all(&empty).unwrap();

        let err = provision(&path, Some(&empty), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, StoreError::MissingDependency(_)), "{}", err);
        assert!(!path.exists());
    }

    #[test]
    fn provision_reports_invalid_schema_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parking.db");
        let migration = dir.path().join("migrations").join("2024-01-01-000000_broken");
        std::fs::create_dir_all(&migration).unwrap();
        std::fs::write(migration.join("up.sql"), "CREATE TABLE org (id INTEGER PRIMARY KEY,").unwrap();
        std::fs::write(migration.join("down.sql"), "DROP TABLE org;").unwrap();

        let err = provision(&path, Some(&dir.path().join("migrations")), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)), "{}", err);
        assert!(!path.exists());
    }

    #[test]
    fn open_existing_does_not_create_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        assert!(open_existing(&path, Duration::from_millis(100)).is_err());
        assert!(!path.exists());
    }
}
