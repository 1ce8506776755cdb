//! Metadata store — the declarative side of the control plane.
//!
//! A single SQLite database holds every Bot row. The store is the only
//! writer; all access goes through one connection behind a mutex, and every
//! multi-row mutation runs in a single transaction. Port allocation is
//! gap-aware: deleting a bot releases its port for reuse.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use bm_domain::bot::{Bot, BotStatus};
use bm_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transactional, single-writer store for Bot records.
pub struct BotStore {
    conn: Mutex<Connection>,
}

impl BotStore {
    /// Open (or create) the database at `path` and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        let applied = migrations::run(&conn)?;
        if applied > 0 {
            tracing::info!(applied, "database migrations applied");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Insert a new Bot row.
    ///
    /// Fails with `Conflict` when the hostname (or port) is already taken.
    pub fn insert(&self, bot: &Bot) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bots (id, hostname, name, ai_provider, model, channel_type, \
             container_id, port, gateway_token, tags, status, image_version, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                bot.id,
                bot.hostname,
                bot.name,
                bot.ai_provider,
                bot.model,
                bot.channel_type,
                bot.container_id,
                bot.port,
                bot.gateway_token,
                encode_tags(&bot.tags)?,
                bot.status.as_str(),
                bot.image_version,
                bot.created_at.to_rfc3339(),
                bot.updated_at.to_rfc3339(),
            ],
        )
        .map_err(insert_err)?;
        Ok(())
    }

    /// Update status only.
    pub fn update_status(&self, id: &str, status: BotStatus) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn
            .execute(
                "UPDATE bots SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        if n == 0 {
            return Err(Error::NotFound(format!("bot {id}")));
        }
        Ok(())
    }

    /// Update status and container handle together, in one transaction.
    pub fn update_container(
        &self,
        id: &str,
        container_id: Option<&str>,
        image_version: &str,
        status: BotStatus,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let n = tx
            .execute(
                "UPDATE bots SET container_id = ?2, image_version = ?3, status = ?4, \
                 updated_at = ?5 WHERE id = ?1",
                params![
                    id,
                    container_id,
                    image_version,
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        if n == 0 {
            return Err(Error::NotFound(format!("bot {id}")));
        }
        Ok(())
    }

    /// Sync a row from observed container state: status plus (optionally)
    /// clearing the container handle. One transaction.
    pub fn sync_status(
        &self,
        id: &str,
        status: BotStatus,
        clear_container: bool,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let n = if clear_container {
            tx.execute(
                "UPDATE bots SET status = ?2, container_id = NULL, updated_at = ?3 \
                 WHERE id = ?1",
                params![id, status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?
        } else {
            tx.execute(
                "UPDATE bots SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?
        };
        tx.commit().map_err(db_err)?;
        if n == 0 {
            return Err(Error::NotFound(format!("bot {id}")));
        }
        Ok(())
    }

    /// Delete a row. The port is released by the row going away.
    /// Deleting a missing row is not an error (delete is idempotent).
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute("DELETE FROM bots WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    // ── reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Bot> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM bots WHERE id = ?1"),
            params![id],
            row_to_bot,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("bot {id}")))
    }

    pub fn get_by_hostname(&self, hostname: &str) -> Result<Bot> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM bots WHERE hostname = ?1"),
            params![hostname],
            row_to_bot,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("bot {hostname}")))
    }

    pub fn list(&self) -> Result<Vec<Bot>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM bots ORDER BY created_at"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_to_bot)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    // ── allocator ────────────────────────────────────────────────────

    /// Smallest port `≥ start` not present in the `port` column.
    ///
    /// Gap-aware: a deleted bot's port becomes allocatable again.
    pub fn next_port(&self, start: u16) -> Result<u16> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT port FROM bots WHERE port IS NOT NULL AND port >= ?1 \
                 ORDER BY port",
            )
            .map_err(db_err)?;
        let taken = stmt
            .query_map(params![start], |row| row.get::<_, u32>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut candidate = u32::from(start);
        for port in taken {
            if port > candidate {
                break;
            }
            if port == candidate {
                candidate += 1;
            }
        }
        u16::try_from(candidate).map_err(|_| Error::PortExhausted(start))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const COLUMNS: &str = "id, hostname, name, ai_provider, model, channel_type, \
                       container_id, port, gateway_token, tags, status, \
                       image_version, created_at, updated_at";

fn row_to_bot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bot> {
    let tags_raw: Option<String> = row.get(9)?;
    let status_raw: String = row.get(10)?;
    let created_raw: String = row.get(12)?;
    let updated_raw: String = row.get(13)?;

    Ok(Bot {
        id: row.get(0)?,
        hostname: row.get(1)?,
        name: row.get(2)?,
        ai_provider: row.get(3)?,
        model: row.get(4)?,
        channel_type: row.get(5)?,
        container_id: row.get(6)?,
        port: row.get(7)?,
        gateway_token: row.get(8)?,
        tags: tags_raw.and_then(|t| serde_json::from_str(&t).ok()),
        status: BotStatus::parse(&status_raw).unwrap_or(BotStatus::Error),
        image_version: row.get(11)?,
        created_at: parse_ts(&created_raw),
        updated_at: parse_ts(&updated_raw),
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn encode_tags(tags: &Option<Vec<String>>) -> Result<Option<String>> {
    match tags {
        Some(t) => Ok(Some(serde_json::to_string(t)?)),
        None => Ok(None),
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// Translate an insert failure, distinguishing uniqueness violations.
fn insert_err(e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(inner, ref msg) = e {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            let detail = msg.as_deref().unwrap_or("");
            if detail.contains("hostname") {
                return Error::Conflict("hostname already in use".into());
            }
            if detail.contains("port") {
                return Error::Conflict("port already allocated".into());
            }
            return Error::Conflict(detail.to_string());
        }
    }
    db_err(e)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(hostname: &str, port: u16) -> Bot {
        let now = Utc::now();
        Bot {
            id: format!("id-{hostname}"),
            hostname: hostname.to_string(),
            name: format!("Bot {hostname}"),
            ai_provider: "openai".into(),
            model: "gpt-4.1".into(),
            channel_type: "telegram".into(),
            container_id: None,
            port: Some(port),
            gateway_token: "tok".into(),
            tags: None,
            status: BotStatus::Created,
            image_version: "openclaw:latest".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let store = BotStore::open_in_memory().unwrap();
        let bot = sample("alpha", 19_000);
        store.insert(&bot).unwrap();

        let loaded = store.get_by_hostname("alpha").unwrap();
        assert_eq!(loaded.id, bot.id);
        assert_eq!(loaded.port, Some(19_000));
        assert_eq!(loaded.status, BotStatus::Created);
    }

    #[test]
    fn duplicate_hostname_is_conflict() {
        let store = BotStore::open_in_memory().unwrap();
        store.insert(&sample("alpha", 19_000)).unwrap();
        let mut dup = sample("alpha", 19_001);
        dup.id = "other".into();
        match store.insert(&dup) {
            Err(Error::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_port_is_conflict() {
        let store = BotStore::open_in_memory().unwrap();
        store.insert(&sample("alpha", 19_000)).unwrap();
        match store.insert(&sample("beta", 19_000)) {
            Err(Error::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn next_port_starts_at_start() {
        let store = BotStore::open_in_memory().unwrap();
        assert_eq!(store.next_port(19_000).unwrap(), 19_000);
    }

    #[test]
    fn next_port_skips_taken_and_reuses_gaps() {
        let store = BotStore::open_in_memory().unwrap();
        store.insert(&sample("a", 19_000)).unwrap();
        store.insert(&sample("b", 19_001)).unwrap();
        store.insert(&sample("c", 19_002)).unwrap();
        assert_eq!(store.next_port(19_000).unwrap(), 19_003);

        // Delete the middle bot: its port becomes the smallest free one.
        store.delete("id-b").unwrap();
        assert_eq!(store.next_port(19_000).unwrap(), 19_001);
    }

    #[test]
    fn next_port_exhaustion() {
        let store = BotStore::open_in_memory().unwrap();
        store.insert(&sample("edge", u16::MAX)).unwrap();
        match store.next_port(u16::MAX) {
            Err(Error::PortExhausted(_)) => {}
            other => panic!("expected PortExhausted, got {other:?}"),
        }
    }

    #[test]
    fn allocated_ports_stay_pairwise_distinct() {
        let store = BotStore::open_in_memory().unwrap();
        for i in 0..10 {
            let port = store.next_port(19_000).unwrap();
            store.insert(&sample(&format!("bot{i}"), port)).unwrap();
        }
        // Delete two, allocate three more.
        store.delete("id-bot3").unwrap();
        store.delete("id-bot7").unwrap();
        for i in 10..13 {
            let port = store.next_port(19_000).unwrap();
            store.insert(&sample(&format!("bot{i}"), port)).unwrap();
        }

        let mut ports: Vec<u16> = store
            .list()
            .unwrap()
            .iter()
            .filter_map(|b| b.port)
            .collect();
        let before = ports.len();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), before, "ports must be pairwise distinct");
    }

    #[test]
    fn delete_is_idempotent() {
        let store = BotStore::open_in_memory().unwrap();
        store.insert(&sample("alpha", 19_000)).unwrap();
        assert!(store.delete("id-alpha").unwrap());
        assert!(!store.delete("id-alpha").unwrap());
    }

    #[test]
    fn update_missing_row_is_not_found() {
        let store = BotStore::open_in_memory().unwrap();
        match store.update_status("ghost", BotStatus::Running) {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn tags_round_trip() {
        let store = BotStore::open_in_memory().unwrap();
        let mut bot = sample("tagged", 19_000);
        bot.tags = Some(vec!["prod".into(), "dev".into()]);
        store.insert(&bot).unwrap();
        let loaded = store.get("id-tagged").unwrap();
        assert_eq!(loaded.tags, Some(vec!["prod".to_string(), "dev".to_string()]));
    }

    #[test]
    fn container_update_is_atomic_with_status() {
        let store = BotStore::open_in_memory().unwrap();
        store.insert(&sample("alpha", 19_000)).unwrap();
        store
            .update_container("id-alpha", Some("c0ffee"), "openclaw:1.2", BotStatus::Running)
            .unwrap();
        let loaded = store.get("id-alpha").unwrap();
        assert_eq!(loaded.container_id.as_deref(), Some("c0ffee"));
        assert_eq!(loaded.image_version, "openclaw:1.2");
        assert_eq!(loaded.status, BotStatus::Running);
    }

    #[test]
    fn sync_status_can_clear_container() {
        let store = BotStore::open_in_memory().unwrap();
        let mut bot = sample("alpha", 19_000);
        bot.container_id = Some("dead".into());
        store.insert(&bot).unwrap();
        store.sync_status("id-alpha", BotStatus::Stopped, true).unwrap();
        let loaded = store.get("id-alpha").unwrap();
        assert_eq!(loaded.container_id, None);
        assert_eq!(loaded.status, BotStatus::Stopped);
    }
}
