use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context_db::schema::*;
use crate::context_db::{migration, open_in_memory_pool, open_pool, SqlitePool};
use crate::context_engine::filter::FilterSpec;
use crate::context_engine::pagination::{ListOrder, PaginationCursor};
use crate::context_engine::slots::{ContextDelta, ContextSlots, SlotKey};
use crate::memory::ContextStore;

/// SQLite implementation of [`ContextStore`]. Concurrency comes from the connection pool;
/// every statement is scoped to one session id.
#[derive(Clone)]
pub struct SqliteContextStore {
    pool: Arc<SqlitePool>,
}

impl SqliteContextStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let pool = open_pool(db_path)?;
        info!("Context store ready at {}", db_path.display());
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self { pool: Arc::new(open_in_memory_pool()?) })
    }

    fn get_conn(&self) -> anyhow::Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn stats(&self) -> anyhow::Result<StoreStats> {
        let conn = self.get_conn()?;
        Ok(migration::get_store_stats(&conn)?)
    }

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_to_session(row: &Row) -> anyhow::Result<Session> {
        let metadata_json: String = row.get(3)?;
        let metadata: SessionMetadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
            warn!("Unreadable session metadata, using defaults: {}", e);
            SessionMetadata::default()
        });
        let created_at = Self::parse_datetime_safe(&row.get::<_, String>(1)?)
            .unwrap_or_else(|| { warn!("Failed parse created_at"); Utc::now() });
        let last_activity = Self::parse_datetime_safe(&row.get::<_, String>(2)?)
            .unwrap_or_else(|| { warn!("Failed parse last_activity"); Utc::now() });

        Ok(Session { id: row.get(0)?, created_at, last_activity, metadata })
    }

    fn row_to_turn(row: &Row) -> anyhow::Result<ConversationTurn> {
        let timestamp = Self::parse_datetime_safe(&row.get::<_, String>(2)?)
            .unwrap_or_else(|| { warn!("Failed parse turn timestamp"); Utc::now() });
        let entities_json: String = row.get(5)?;
        let entities = serde_json::from_str(&entities_json).unwrap_or(serde_json::Value::Null);

        Ok(ConversationTurn {
            id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp,
            question: row.get(3)?,
            answer: row.get(4)?,
            entities,
        })
    }
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

/// Insert the session if missing, otherwise bump its last activity.
fn touch_session(conn: &Connection, session_id: &str) -> rusqlite::Result<()> {
    let now = now_str();
    conn.execute(
        "INSERT INTO sessions (id, created_at, last_activity, metadata) VALUES (?1, ?2, ?2, '{}')
         ON CONFLICT(id) DO UPDATE SET last_activity = excluded.last_activity",
        params![session_id, now],
    )?;
    Ok(())
}

fn write_slots(conn: &Connection, session_id: &str, partial: &ContextSlots) -> rusqlite::Result<usize> {
    let now = now_str();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO context_slots (session_id, slot_key, slot_value, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id, slot_key) DO UPDATE
         SET slot_value = excluded.slot_value, updated_at = excluded.updated_at",
    )?;
    let mut written = 0;
    for key in partial.keys() {
        if let Some(value) = partial.get_raw(key) {
            stmt.execute(params![session_id, key.as_str(), value, now])?;
            written += 1;
        }
    }
    Ok(written)
}

fn delete_slots(conn: &Connection, session_id: &str, keys: &[SlotKey]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached("DELETE FROM context_slots WHERE session_id = ?1 AND slot_key = ?2")?;
    let mut deleted = 0;
    for key in keys {
        deleted += stmt.execute(params![session_id, key.as_str()])?;
    }
    Ok(deleted)
}

impl ContextStore for SqliteContextStore {
    fn ensure_session(&self, session_id: &str) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id, created_at, last_activity, metadata) VALUES (?1, ?2, ?2, '{}')",
            params![session_id, now_str()],
        )?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, last_activity, metadata FROM sessions WHERE id = ?1",
        )?;
        let mut rows = stmt.query([session_id])?;
        let session = match rows.next()? {
            Some(row) => Some(Self::row_to_session(row)?),
            None => None,
        };
        Ok(session)
    }

    fn list_sessions(&self) -> anyhow::Result<Vec<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, last_activity, metadata FROM sessions ORDER BY last_activity DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(Self::row_to_session(row)?);
        }
        Ok(sessions)
    }

    fn get_context(&self, session_id: &str) -> anyhow::Result<ContextSlots> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT slot_key, slot_value FROM context_slots WHERE session_id = ?1",
        )?;
        let mut rows = stmt.query([session_id])?;

        let mut slots = ContextSlots::default();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            let parsed = key
                .parse::<SlotKey>()
                .and_then(|k| slots.set_raw(k, &value));
            if let Err(e) = parsed {
                warn!("Skipping stored slot for session {}: {}", session_id, e);
            }
        }
        Ok(slots)
    }

    fn update_context(&self, session_id: &str, partial: &ContextSlots) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        touch_session(&tx, session_id)?;
        let written = write_slots(&tx, session_id, partial)?;
        tx.commit()?;
        debug!("Updated {} context slots for session {}", written, session_id);
        Ok(())
    }

    fn clear_context(&self, session_id: &str, keys: Option<&[SlotKey]>) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let deleted = match keys {
            Some(keys) => delete_slots(&tx, session_id, keys)?,
            None => {
                tx.execute("DELETE FROM pagination_cursors WHERE session_id = ?1", [session_id])?;
                tx.execute("DELETE FROM context_slots WHERE session_id = ?1", [session_id])?
            }
        };
        tx.commit()?;
        debug!("Cleared {} context slots for session {}", deleted, session_id);
        Ok(())
    }

    /// Clear and update in one transaction.
    fn apply_delta(&self, session_id: &str, delta: &ContextDelta) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        touch_session(&tx, session_id)?;
        delete_slots(&tx, session_id, &delta.clear)?;
        write_slots(&tx, session_id, &delta.set)?;
        tx.commit()?;
        Ok(())
    }

    fn append_turn(&self, turn: NewTurn) -> anyhow::Result<ConversationTurn> {
        let now = Utc::now();
        let entities_json = serde_json::to_string(&turn.entities)?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        touch_session(&tx, &turn.session_id)?;
        tx.execute(
            "INSERT INTO conversation_turns (session_id, timestamp, question, answer, entities)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![turn.session_id, now.to_rfc3339(), turn.question, turn.answer, entities_json],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(ConversationTurn {
            id,
            session_id: turn.session_id,
            timestamp: now,
            question: turn.question,
            answer: turn.answer,
            entities: turn.entities,
        })
    }

    fn get_history(&self, session_id: &str, limit: usize) -> anyhow::Result<Vec<ConversationTurn>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, session_id, timestamp, question, answer, entities
             FROM conversation_turns WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![session_id, limit as i64])?;
        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.push(Self::row_to_turn(row)?);
        }
        turns.reverse();
        Ok(turns)
    }

    fn get_cursor(&self, session_id: &str) -> anyhow::Result<Option<PaginationCursor>> {
        let conn = self.get_conn()?;
        let row: Option<(String, String, i64, i64, i64)> = conn
            .query_row(
                "SELECT filter_spec, list_order, page_offset, page_len, total
                 FROM pagination_cursors WHERE session_id = ?1",
                [session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        match row {
            Some((filter_json, order, offset, len, total)) => {
                let filter: FilterSpec = serde_json::from_str(&filter_json)
                    .with_context(|| format!("Invalid stored cursor for session {}", session_id))?;
                let order: ListOrder = order
                    .parse()
                    .with_context(|| format!("Invalid stored cursor for session {}", session_id))?;
                Ok(Some(PaginationCursor {
                    filter,
                    order,
                    offset: offset.max(0) as usize,
                    len: len.max(0) as usize,
                    total: total.max(0) as usize,
                }))
            }
            None => Ok(None),
        }
    }

    fn set_cursor(&self, session_id: &str, cursor: &PaginationCursor) -> anyhow::Result<()> {
        let filter_json = serde_json::to_string(&cursor.filter)?;
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        touch_session(&tx, session_id)?;
        tx.execute(
            "INSERT INTO pagination_cursors
                 (session_id, filter_spec, list_order, page_offset, page_len, total, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id) DO UPDATE SET filter_spec = excluded.filter_spec,
                 list_order = excluded.list_order, page_offset = excluded.page_offset,
                 page_len = excluded.page_len, total = excluded.total, updated_at = excluded.updated_at",
            params![
                session_id,
                filter_json,
                cursor.order.as_str(),
                cursor.offset as i64,
                cursor.len as i64,
                cursor.total as i64,
                now_str()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn prune_history(&self, session_id: &str, keep: usize) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let removed = conn.execute(
            "DELETE FROM conversation_turns WHERE session_id = ?1 AND id NOT IN (
                SELECT id FROM conversation_turns WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2
             )",
            params![session_id, keep as i64],
        )?;
        if removed > 0 {
            info!("Pruned {} turns from session {}", removed, session_id);
        }
        Ok(removed)
    }

    fn cleanup_old_sessions(&self, older_than_days: i64) -> anyhow::Result<usize> {
        let cutoff = (Utc::now() - Duration::days(older_than_days)).to_rfc3339();
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM sessions WHERE last_activity < ?1", [&cutoff])?;
        info!("Cleaned up {} old sessions", deleted);
        Ok(deleted)
    }
}
