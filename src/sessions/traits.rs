//! Session storage traits and types for support conversations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::session::Session;

/// Speaker of a single conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Capitalized label used in prompt transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One entry of a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit entry for a resolved support issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueRecord {
    pub issue: String,
    pub solution: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-session options fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    pub voice_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            voice_enabled: false,
        }
    }
}

/// Everything known about the user of one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserData {
    pub name: Option<String>,
    pub user_type: String,
    /// Reserved for an active classification task; not populated yet.
    pub current_product: Option<String>,
    /// Reserved for an active classification task; not populated yet.
    pub current_predictions: Vec<serde_json::Value>,
    pub conversation_history: Vec<Turn>,
    pub preferences: Preferences,
    pub start_time: DateTime<Utc>,
    pub issues_resolved: Vec<IssueRecord>,
    /// Reserved for intent classification; not populated yet.
    pub last_intent: Option<String>,
}

/// Durable snapshot of a session, written by the session logger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_data: UserData,
    pub end_time: DateTime<Utc>,
}

/// Shared handle to one session. Each session carries its own lock so
/// concurrent turns on the same id are serialized.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Keyed collection of live sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up `id`, or create a session for it. With `None` a fresh id is
    /// generated. An existing session is never replaced.
    async fn create(&self, id: Option<&str>) -> Result<SessionHandle>;

    /// Get an existing session by id, if it exists.
    async fn get(&self, id: &str) -> Result<Option<SessionHandle>>;

    /// Ids of all live sessions, in no particular order.
    async fn ids(&self) -> Result<Vec<String>>;

    /// Drop every session.
    async fn clear(&self) -> Result<()>;

    /// Number of live sessions.
    async fn len(&self) -> Result<usize>;

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}
