//! Persisted record types for the context database
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_defined: HashMap<String, String>,
}

/// One question/answer exchange. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    /// Entities extracted for the turn, as JSON
    pub entities: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub session_id: String,
    pub question: String,
    pub answer: String,
    pub entities: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_sessions: i64,
    pub total_turns: i64,
    pub total_slots: i64,
    pub total_cursors: i64,
    pub database_size_bytes: i64,
}
