//! Append-only schema migration log.
//!
//! Each migration is `(version, sql)`. A migration is applied iff its
//! version exceeds the current maximum in `schema_migrations`; the DDL and
//! the version insert commit in one transaction, so a crash mid-migration
//! leaves the log consistent.

use rusqlite::{params, Connection};

use bm_domain::error::{Error, Result};

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE bots (
            id            TEXT PRIMARY KEY,
            hostname      TEXT NOT NULL UNIQUE,
            name          TEXT NOT NULL,
            ai_provider   TEXT NOT NULL,
            model         TEXT NOT NULL,
            channel_type  TEXT NOT NULL,
            container_id  TEXT,
            port          INTEGER,
            gateway_token TEXT NOT NULL,
            tags          TEXT,
            status        TEXT NOT NULL,
            image_version TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        )",
    ),
    (
        2,
        "CREATE UNIQUE INDEX idx_bots_port ON bots(port) WHERE port IS NOT NULL",
    ),
];

/// Apply pending migrations. Returns how many ran.
pub fn run(conn: &Connection) -> Result<usize> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(migration_err)?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(migration_err)?;

    let mut applied = 0;
    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch("BEGIN").map_err(migration_err)?;
        let result = conn.execute_batch(sql).and_then(|()| {
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, chrono::Utc::now().to_rfc3339()],
            )
            .map(|_| ())
        });
        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT").map_err(migration_err)?;
                tracing::debug!(version, "migration applied");
                applied += 1;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(Error::Database(format!("migration {version}: {e}")));
            }
        }
    }
    Ok(applied)
}

fn migration_err(e: rusqlite::Error) -> Error {
    Error::Database(format!("migrations: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_applies_all_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = run(&conn).unwrap();
        assert_eq!(applied, MIGRATIONS.len());
    }

    #[test]
    fn second_run_applies_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        let applied = run(&conn).unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn versions_are_strictly_increasing() {
        let mut prev = 0;
        for (version, _) in MIGRATIONS {
            assert!(*version > prev, "migration versions must increase");
            prev = *version;
        }
    }
}
