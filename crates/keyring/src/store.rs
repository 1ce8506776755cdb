//! Keyring persistence: encrypted key rows, the bot registry, and the
//! append-only usage log.
//!
//! Same discipline as the control-plane store: one SQLite connection behind
//! a mutex, integer-versioned append-only migrations, RFC 3339 timestamps.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use bm_domain::error::{Error, Result};

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE provider_keys (
            id               TEXT PRIMARY KEY,
            vendor           TEXT NOT NULL,
            secret_encrypted BLOB NOT NULL,
            label            TEXT,
            tag              TEXT,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX idx_keys_vendor ON provider_keys(vendor);
        CREATE TABLE proxy_bots (
            id         TEXT PRIMARY KEY,
            hostname   TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            tags       TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE usage_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_id      TEXT NOT NULL,
            vendor      TEXT NOT NULL,
            key_id      TEXT,
            status_code INTEGER,
            created_at  TEXT NOT NULL
        )",
    ),
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A credential row, ciphertext included. Internal to the process.
#[derive(Debug, Clone)]
pub struct ProviderKey {
    pub id: String,
    pub vendor: String,
    pub secret_encrypted: Vec<u8>,
    pub label: Option<String>,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What listing endpoints expose: everything but the ciphertext.
#[derive(Debug, Clone, Serialize)]
pub struct KeyMeta {
    pub id: String,
    pub vendor: String,
    pub label: Option<String>,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A registered bot as the proxy sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyBot {
    pub id: String,
    pub hostname: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct KeyStore {
    conn: Mutex<Connection>,
}

impl KeyStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── provider keys ────────────────────────────────────────────────

    /// Insert an encrypted key row; returns its id.
    pub fn add_key(
        &self,
        vendor: &str,
        secret_encrypted: Vec<u8>,
        label: Option<&str>,
        tag: Option<&str>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO provider_keys (id, vendor, secret_encrypted, label, tag, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, vendor, secret_encrypted, label, tag, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    pub fn get_key(&self, id: &str) -> Result<ProviderKey> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, vendor, secret_encrypted, label, tag, created_at \
             FROM provider_keys WHERE id = ?1",
            params![id],
            row_to_key,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("key {id}")))
    }

    pub fn delete_key(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute("DELETE FROM provider_keys WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// All keys, ciphertext omitted.
    pub fn list_keys(&self) -> Result<Vec<KeyMeta>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, vendor, label, tag, created_at FROM provider_keys \
                 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(KeyMeta {
                    id: row.get(0)?,
                    vendor: row.get(1)?,
                    label: row.get(2)?,
                    tag: row.get(3)?,
                    created_at: parse_ts(&row.get::<_, String>(4)?),
                })
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn keys_by_vendor(&self, vendor: &str) -> Result<Vec<ProviderKey>> {
        self.query_keys(
            "SELECT id, vendor, secret_encrypted, label, tag, created_at \
             FROM provider_keys WHERE vendor = ?1 ORDER BY created_at, id",
            params![vendor],
        )
    }

    pub fn keys_by_vendor_and_tag(&self, vendor: &str, tag: &str) -> Result<Vec<ProviderKey>> {
        self.query_keys(
            "SELECT id, vendor, secret_encrypted, label, tag, created_at \
             FROM provider_keys WHERE vendor = ?1 AND tag = ?2 ORDER BY created_at, id",
            params![vendor, tag],
        )
    }

    /// Keys with no tag — the default pool for a vendor.
    pub fn default_keys_for_vendor(&self, vendor: &str) -> Result<Vec<ProviderKey>> {
        self.query_keys(
            "SELECT id, vendor, secret_encrypted, label, tag, created_at \
             FROM provider_keys WHERE vendor = ?1 AND tag IS NULL ORDER BY created_at, id",
            params![vendor],
        )
    }

    fn query_keys(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ProviderKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params, row_to_key)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn count_keys(&self) -> Result<u64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM provider_keys", [], |r| r.get(0))
            .map_err(db_err)
    }

    // ── bot registry ─────────────────────────────────────────────────

    /// Register a bot. Fails with `Conflict` on a duplicate id.
    pub fn register_bot(
        &self,
        id: &str,
        hostname: &str,
        token_hash: &str,
        tags: Option<&[String]>,
    ) -> Result<()> {
        let tags_json = match tags {
            Some(t) => Some(serde_json::to_string(t)?),
            None => None,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO proxy_bots (id, hostname, token_hash, tags, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, hostname, token_hash, tags_json, Utc::now().to_rfc3339()],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(inner, _) = &e {
                if inner.code == rusqlite::ErrorCode::ConstraintViolation {
                    return Error::Conflict(format!("bot {id} already registered"));
                }
            }
            db_err(e)
        })?;
        Ok(())
    }

    pub fn bot_by_token_hash(&self, token_hash: &str) -> Result<Option<ProxyBot>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, hostname, token_hash, tags, created_at FROM proxy_bots \
             WHERE token_hash = ?1",
            params![token_hash],
            row_to_bot,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn delete_bot(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute("DELETE FROM proxy_bots WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    pub fn list_bots(&self) -> Result<Vec<ProxyBot>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, hostname, token_hash, tags, created_at FROM proxy_bots \
                 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_to_bot)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn count_bots(&self) -> Result<u64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM proxy_bots", [], |r| r.get(0))
            .map_err(db_err)
    }

    // ── usage log ────────────────────────────────────────────────────

    /// Append one usage entry. Append-only; rotation is an operator concern.
    pub fn log_usage(
        &self,
        bot_id: &str,
        vendor: &str,
        key_id: Option<&str>,
        status_code: Option<u16>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO usage_log (bot_id, vendor, key_id, status_code, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![bot_id, vendor, key_id, status_code, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn usage_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM usage_log", [], |r| r.get(0))
            .map_err(db_err)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(db_err)?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(db_err)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch("BEGIN").map_err(db_err)?;
        let result = conn.execute_batch(sql).and_then(|()| {
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, Utc::now().to_rfc3339()],
            )
            .map(|_| ())
        });
        match result {
            Ok(()) => conn.execute_batch("COMMIT").map_err(db_err)?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(Error::Database(format!("migration {version}: {e}")));
            }
        }
    }
    Ok(())
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderKey> {
    Ok(ProviderKey {
        id: row.get(0)?,
        vendor: row.get(1)?,
        secret_encrypted: row.get(2)?,
        label: row.get(3)?,
        tag: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

fn row_to_bot(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProxyBot> {
    let tags_raw: Option<String> = row.get(3)?;
    Ok(ProxyBot {
        id: row.get(0)?,
        hostname: row.get(1)?,
        token_hash: row.get(2)?,
        tags: tags_raw.and_then(|t| serde_json::from_str(&t).ok()),
        created_at: parse_ts(&row.get::<_, String>(4)?),
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_crud_and_vendor_queries() {
        let store = KeyStore::open_in_memory().unwrap();
        let a = store.add_key("openai", vec![1, 2, 3], Some("alpha"), Some("prod")).unwrap();
        let b = store.add_key("openai", vec![4, 5], None, None).unwrap();
        store.add_key("anthropic", vec![6], None, None).unwrap();

        assert_eq!(store.keys_by_vendor("openai").unwrap().len(), 2);
        assert_eq!(
            store.keys_by_vendor_and_tag("openai", "prod").unwrap()[0].id,
            a
        );
        assert_eq!(store.default_keys_for_vendor("openai").unwrap()[0].id, b);
        assert_eq!(store.count_keys().unwrap(), 3);

        assert!(store.delete_key(&a).unwrap());
        assert!(!store.delete_key(&a).unwrap());
    }

    #[test]
    fn listing_omits_ciphertext() {
        let store = KeyStore::open_in_memory().unwrap();
        store.add_key("openai", vec![0xde, 0xad], Some("x"), None).unwrap();
        let listed = store.list_keys().unwrap();
        let json = serde_json::to_value(&listed).unwrap();
        assert!(json[0].get("secret_encrypted").is_none());
    }

    #[test]
    fn bot_registry_conflicts_on_duplicate_id() {
        let store = KeyStore::open_in_memory().unwrap();
        store.register_bot("b1", "my-bot", "hash1", None).unwrap();
        match store.register_bot("b1", "my-bot", "hash2", None) {
            Err(Error::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn bot_lookup_by_token_hash() {
        let store = KeyStore::open_in_memory().unwrap();
        let tags = vec!["prod".to_string()];
        store.register_bot("b1", "my-bot", "hash1", Some(&tags)).unwrap();

        let found = store.bot_by_token_hash("hash1").unwrap().unwrap();
        assert_eq!(found.id, "b1");
        assert_eq!(found.tags, Some(tags));
        assert!(store.bot_by_token_hash("nope").unwrap().is_none());
    }

    #[test]
    fn bot_listing_never_serializes_token_hash() {
        let store = KeyStore::open_in_memory().unwrap();
        store.register_bot("b1", "my-bot", "supersecret-hash", None).unwrap();
        let json = serde_json::to_value(store.list_bots().unwrap()).unwrap();
        assert!(json[0].get("token_hash").is_none());
    }

    #[test]
    fn usage_log_appends() {
        let store = KeyStore::open_in_memory().unwrap();
        store.log_usage("b1", "openai", Some("k1"), Some(200)).unwrap();
        store.log_usage("b1", "openai", None, Some(502)).unwrap();
        assert_eq!(store.usage_count().unwrap(), 2);
    }
}
