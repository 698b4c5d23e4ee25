use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::ConnectionError;
use crate::settings;

pub type DbPool = Pool<SqliteConnectionManager>;

pub const INVENTORY_DB_FILE: &str = "inventory.db";
pub const SETTINGS_DB_FILE: &str = "settings.db";

pub type Migration = (&'static str, &'static str);

pub const INVENTORY_SCHEMA: &[Migration] = &[
    (
        "0001_parts.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../migrations/inventory/0001_parts.sql"
        )),
    ),
    (
        "0002_event_log.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../migrations/inventory/0002_event_log.sql"
        )),
    ),
];

pub const SETTINGS_SCHEMA: &[Migration] = &[(
    "0001_settings.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../migrations/settings/0001_settings.sql"
    )),
)];

/// Open (creating if needed) a SQLite file with the pragmas every store uses.
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, ConnectionError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConnectionError::Directory {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let open_err = |source| ConnectionError::Open {
        path: path.to_path_buf(),
        source,
    };
    let conn = Connection::open(path).map_err(open_err)?;
    conn.busy_timeout(busy_timeout).map_err(open_err)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(open_err)?;
    Ok(conn)
}

/// Every statement is `IF NOT EXISTS`, so this is safe on each connect.
pub fn apply_schema(conn: &Connection, migrations: &[Migration]) -> Result<(), ConnectionError> {
    for &(name, sql) in migrations {
        conn.execute_batch(sql)
            .map_err(|source| ConnectionError::Schema { name, source })?;
    }
    Ok(())
}

/// Build the settings pool inside `workspace_dir` and seed default values.
pub fn init_settings_db(workspace_dir: &Path) -> Result<DbPool> {
    std::fs::create_dir_all(workspace_dir)
        .with_context(|| format!("failed to create {}", workspace_dir.display()))?;
    let db_path: PathBuf = workspace_dir.join(SETTINGS_DB_FILE);
    let mgr = SqliteConnectionManager::file(&db_path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(4).build(mgr)?;
    {
        let conn = pool.get()?;
        apply_schema(&conn, SETTINGS_SCHEMA).context("failed to apply settings schema")?;
        settings::seed_defaults(&conn)?;
    }
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_connection_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join(INVENTORY_DB_FILE);
        let conn = open_connection(&path, Duration::from_millis(100)).unwrap();
        apply_schema(&conn, INVENTORY_SCHEMA).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn schema_application_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn, INVENTORY_SCHEMA).unwrap();
        apply_schema(&conn, INVENTORY_SCHEMA).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('parts', 'event_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn settings_db_is_seeded_on_init() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_settings_db(dir.path()).unwrap();
        let conn = pool.get().unwrap();
        let language: String = conn
            .query_row("SELECT value FROM settings WHERE key = 'language'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(language, "en");
    }
}
