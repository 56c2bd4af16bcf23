use anyhow::Result;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::context_db::schema::{ConversationTurn, NewTurn, Session, SessionMetadata};
use crate::context_engine::pagination::PaginationCursor;
use crate::context_engine::slots::{ContextDelta, ContextSlots, SlotKey};

/// Durable per-session state: context slots, turn history and the pagination cursor.
/// Every operation is keyed by session id; unknown sessions read as empty.
pub trait ContextStore: Send + Sync {
    /// Create the session record if it does not exist yet.
    fn ensure_session(&self, session_id: &str) -> Result<()>;

    fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Most recently active first.
    fn list_sessions(&self) -> Result<Vec<Session>>;

    fn get_context(&self, session_id: &str) -> Result<ContextSlots>;

    /// Overwrite every slot present in `partial`, create the session if needed and bump
    /// its last activity.
    fn update_context(&self, session_id: &str, partial: &ContextSlots) -> Result<()>;

    /// Remove the given slots, or all slots and the cursor when `keys` is `None`.
    /// The session record and its history are kept.
    fn clear_context(&self, session_id: &str, keys: Option<&[SlotKey]>) -> Result<()>;

    fn apply_delta(&self, session_id: &str, delta: &ContextDelta) -> Result<()> {
        if !delta.clear.is_empty() {
            self.clear_context(session_id, Some(&delta.clear))?;
        }
        self.update_context(session_id, &delta.set)
    }

    fn append_turn(&self, turn: NewTurn) -> Result<ConversationTurn>;

    /// The last `limit` turns in chronological order.
    fn get_history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;

    fn get_cursor(&self, session_id: &str) -> Result<Option<PaginationCursor>>;

    fn set_cursor(&self, session_id: &str, cursor: &PaginationCursor) -> Result<()>;

    /// Delete all but the newest `keep` turns. Returns the number removed.
    fn prune_history(&self, session_id: &str, keep: usize) -> Result<usize>;

    /// Delete sessions idle for more than `older_than_days`, with everything they own.
    fn cleanup_old_sessions(&self, older_than_days: i64) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct SessionState {
    session: Session,
    slots: ContextSlots,
    turns: Vec<ConversationTurn>,
    cursor: Option<PaginationCursor>,
}

impl SessionState {
    fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session: Session {
                id: session_id.to_string(),
                created_at: now,
                last_activity: now,
                metadata: SessionMetadata::default(),
            },
            slots: ContextSlots::default(),
            turns: Vec::new(),
            cursor: None,
        }
    }

    fn touch(&mut self) {
        self.session.last_activity = Utc::now();
    }
}

/// DashMap-backed store; state lives as long as the process.
#[derive(Clone)]
pub struct InMemoryContextStore {
    store: Arc<DashMap<String, SessionState>>,
    next_turn_id: Arc<AtomicI64>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            next_turn_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

impl ContextStore for InMemoryContextStore {
    fn ensure_session(&self, session_id: &str) -> Result<()> {
        self.store
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id));
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.store.get(session_id).map(|s| s.session.clone()))
    }

    fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.store.iter().map(|s| s.session.clone()).collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    fn get_context(&self, session_id: &str) -> Result<ContextSlots> {
        Ok(self
            .store
            .get(session_id)
            .map(|s| s.slots.clone())
            .unwrap_or_default())
    }

    fn update_context(&self, session_id: &str, partial: &ContextSlots) -> Result<()> {
        let mut entry = self
            .store
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id));
        entry.slots.overlay(partial);
        entry.touch();
        Ok(())
    }

    fn clear_context(&self, session_id: &str, keys: Option<&[SlotKey]>) -> Result<()> {
        if let Some(mut entry) = self.store.get_mut(session_id) {
            match keys {
                Some(keys) => keys.iter().for_each(|k| entry.slots.clear(*k)),
                None => {
                    entry.slots = ContextSlots::default();
                    entry.cursor = None;
                }
            }
        }
        Ok(())
    }

    fn append_turn(&self, turn: NewTurn) -> Result<ConversationTurn> {
        let stored = ConversationTurn {
            id: self.next_turn_id.fetch_add(1, Ordering::SeqCst),
            session_id: turn.session_id.clone(),
            timestamp: Utc::now(),
            question: turn.question,
            answer: turn.answer,
            entities: turn.entities,
        };
        let mut entry = self
            .store
            .entry(turn.session_id.clone())
            .or_insert_with(|| SessionState::new(&turn.session_id));
        entry.turns.push(stored.clone());
        entry.touch();
        Ok(stored)
    }

    fn get_history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        Ok(match self.store.get(session_id) {
            Some(state) => {
                let skip = state.turns.len().saturating_sub(limit);
                state.turns[skip..].to_vec()
            }
            None => Vec::new(),
        })
    }

    fn get_cursor(&self, session_id: &str) -> Result<Option<PaginationCursor>> {
        Ok(self.store.get(session_id).and_then(|s| s.cursor.clone()))
    }

    fn set_cursor(&self, session_id: &str, cursor: &PaginationCursor) -> Result<()> {
        let mut entry = self
            .store
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id));
        entry.cursor = Some(cursor.clone());
        Ok(())
    }

    fn prune_history(&self, session_id: &str, keep: usize) -> Result<usize> {
        Ok(match self.store.get_mut(session_id) {
            Some(mut state) => {
                let excess = state.turns.len().saturating_sub(keep);
                state.turns.drain(..excess);
                excess
            }
            None => 0,
        })
    }

    fn cleanup_old_sessions(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let before = self.store.len();
        self.store.retain(|_, state| state.session.last_activity >= cutoff);
        Ok(before - self.store.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::filter::FilterSpec;
    use crate::context_engine::pagination::ListOrder;
    use crate::context_engine::slots::{Action, EntitySet};

    fn partial(municipality: &str) -> ContextSlots {
        ContextSlots {
            entities: EntitySet { municipality: Some(municipality.into()), ..Default::default() },
            last_action: Some(Action::Count),
        }
    }

    fn turn(session: &str, question: &str) -> NewTurn {
        NewTurn {
            session_id: session.into(),
            question: question.into(),
            answer: "ok".into(),
            entities: serde_json::json!({}),
        }
    }

    #[test]
    fn test_unknown_session_reads_empty() {
        let store = InMemoryContextStore::new();
        assert!(store.get_context("nope").unwrap().is_empty());
        assert!(store.get_history("nope", 10).unwrap().is_empty());
        assert!(store.get_cursor("nope").unwrap().is_none());
        assert!(store.get_session("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_overwrites_per_key_and_creates_session() {
        let store = InMemoryContextStore::new();
        store.update_context("s1", &partial("Manila")).unwrap();
        store.update_context("s1", &partial("Quezon City")).unwrap();

        let ctx = store.get_context("s1").unwrap();
        assert_eq!(ctx.entities.municipality.as_deref(), Some("Quezon City"));
        assert_eq!(ctx.last_action, Some(Action::Count));
        assert!(store.get_session("s1").unwrap().is_some());
        assert!(store.get_context("s2").unwrap().is_empty());
    }

    #[test]
    fn test_clear_keeps_session_and_history() {
        let store = InMemoryContextStore::new();
        store.update_context("s1", &partial("Manila")).unwrap();
        store.append_turn(turn("s1", "q")).unwrap();

        store.clear_context("s1", Some(&[SlotKey::LastAction])).unwrap();
        let ctx = store.get_context("s1").unwrap();
        assert!(ctx.last_action.is_none());
        assert!(ctx.entities.municipality.is_some());

        store.clear_context("s1", None).unwrap();
        assert!(store.get_context("s1").unwrap().is_empty());
        assert_eq!(store.get_history("s1", 10).unwrap().len(), 1);
        assert!(store.get_session("s1").unwrap().is_some());
    }

    #[test]
    fn test_history_is_chronological_and_limited() {
        let store = InMemoryContextStore::new();
        for i in 0..5 {
            store.append_turn(turn("s1", &format!("q{}", i))).unwrap();
        }
        let history = store.get_history("s1", 3).unwrap();
        let questions: Vec<_> = history.iter().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4"]);
        assert!(history[0].id < history[2].id);

        assert_eq!(store.prune_history("s1", 2).unwrap(), 3);
        assert_eq!(store.get_history("s1", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_cursor_round_trip() {
        let store = InMemoryContextStore::new();
        let cursor = PaginationCursor {
            filter: FilterSpec::default(),
            order: ListOrder::BudgetAsc,
            offset: 5,
            len: 5,
            total: 12,
        };
        store.set_cursor("s1", &cursor).unwrap();
        assert_eq!(store.get_cursor("s1").unwrap(), Some(cursor));
    }

    #[test]
    fn test_cleanup_old_sessions_keeps_recent() {
        let store = InMemoryContextStore::new();
        store.ensure_session("s1").unwrap();
        assert_eq!(store.cleanup_old_sessions(30).unwrap(), 0);
        assert_eq!(store.list_sessions().unwrap().len(), 1);
    }
}
