//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY,
                message_id TEXT UNIQUE,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'NEW'
                    CHECK (status IN ('NEW', 'PROCESSED', 'NEEDS_OPERATOR', 'ESCALATED', 'CLOSED')),
                complexity TEXT
                    CHECK (complexity IS NULL OR complexity IN ('low', 'high')),
                sentiment TEXT
                    CHECK (sentiment IS NULL OR sentiment IN ('negative', 'neutral', 'positive')),
                ai_response TEXT,
                confidence REAL
                    CHECK (confidence IS NULL OR (confidence >= 0.5 AND confidence <= 0.99)),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_emails_status ON emails(status);
        "#,
    },
    Migration {
        version: 2,
        name: "listing_indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_emails_created_at ON emails(created_at);
            CREATE INDEX IF NOT EXISTS idx_emails_status_created_at ON emails(status, created_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn count(conn: &Connection, sql: &str, name: &str) -> i64 {
        let mut rows = conn.query(sql, libsql::params![name]).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get(0).unwrap()
    }

    #[tokio::test]
    async fn migrations_create_tables_and_indexes() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in ["emails", "_migrations"] {
            let n = count(
                &conn,
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                table,
            )
            .await;
            assert_eq!(n, 1, "Table '{table}' should exist");
        }
        for index in [
            "idx_emails_status",
            "idx_emails_created_at",
            "idx_emails_status_created_at",
        ] {
            let n = count(
                &conn,
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
                index,
            )
            .await;
            assert_eq!(n, 1, "Index '{index}' should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        assert_eq!(row1.get::<i64>(0).unwrap(), 1);
        assert_eq!(row1.get::<String>(1).unwrap(), "initial_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        assert_eq!(row2.get::<i64>(0).unwrap(), 2);
        assert_eq!(row2.get::<String>(1).unwrap(), "listing_indexes");
    }

    #[tokio::test]
    async fn status_check_constraint() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let result = conn
            .execute(
                "INSERT INTO emails (id, sender, subject, body, status, created_at, updated_at)
                 VALUES ('x', 's', 'sub', 'b', 'BOGUS', '2026-01-01', '2026-01-01')",
                (),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn message_id_unique_but_nullable() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let insert = "INSERT INTO emails (id, message_id, sender, subject, body, created_at, updated_at)
                      VALUES (?1, ?2, 's', 'sub', 'b', '2026-01-01', '2026-01-01')";
        conn.execute(insert, libsql::params!["a", libsql::Value::Null])
            .await
            .unwrap();
        conn.execute(insert, libsql::params!["b", libsql::Value::Null])
            .await
            .unwrap();
        conn.execute(insert, libsql::params!["c", "<m@x>"]).await.unwrap();
        assert!(conn.execute(insert, libsql::params!["d", "<m@x>"]).await.is_err());
    }
}
