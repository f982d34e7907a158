//! The session entity: identity, user attributes and bounded history.

use chrono::Utc;
use uuid::Uuid;

use super::name::extract_name;
use super::traits::{IssueRecord, Preferences, Role, SessionRecord, Turn, UserData};

/// Default cap on stored conversation turns.
pub const MAX_HISTORY_MESSAGES: usize = 20;

/// Characters of an issue kept in its log line.
const ISSUE_LOG_CHARS: usize = 100;

/// Generate a timestamp-based session id with a random suffix.
pub fn generate_session_id() -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{stamp}_{}", &suffix[..8])
}

/// One user's ongoing conversation context.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: UserData,
    history_limit: usize,
}

impl Session {
    /// Create a session with the default history cap.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_history_limit(id, MAX_HISTORY_MESSAGES)
    }

    /// Create a session that keeps at most `limit` turns (minimum 1).
    pub fn with_history_limit(id: impl Into<String>, limit: usize) -> Self {
        Self {
            id: id.into(),
            data: UserData {
                name: None,
                user_type: "unknown".to_string(),
                current_product: None,
                current_predictions: Vec::new(),
                conversation_history: Vec::new(),
                preferences: Preferences::default(),
                start_time: Utc::now(),
                issues_resolved: Vec::new(),
                last_intent: None,
            },
            history_limit: limit.max(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &UserData {
        &self.data
    }

    pub fn name(&self) -> Option<&str> {
        self.data.name.as_deref()
    }

    pub fn history(&self) -> &[Turn] {
        &self.data.conversation_history
    }

    pub fn issues(&self) -> &[IssueRecord] {
        &self.data.issues_resolved
    }

    /// Append a timestamped turn, evicting the oldest entries past the cap.
    pub fn append_turn(&mut self, role: Role, message: impl Into<String>) {
        let history = &mut self.data.conversation_history;
        history.push(Turn {
            role,
            message: message.into(),
            timestamp: Utc::now(),
        });
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
    }

    /// Set the display name from `input` unless one is already known.
    /// Returns the name when this call set it.
    pub fn extract_and_set_name(&mut self, input: &str) -> Option<&str> {
        if self.data.name.is_some() {
            return None;
        }
        let name = extract_name(input)?;
        tracing::info!(session_id = %self.id, name = %name, "User provided name");
        self.data.name = Some(name);
        self.data.name.as_deref()
    }

    /// Append an issue/solution pair to the audit log.
    pub fn record_issue_resolution(&mut self, issue: impl Into<String>, solution: impl Into<String>) {
        let issue = issue.into();
        let preview: String = issue.chars().take(ISSUE_LOG_CHARS).collect();
        tracing::info!(
            session_id = %self.id,
            user = self.data.name.as_deref().unwrap_or("Unknown"),
            issue = %preview,
            "Issue resolved"
        );
        self.data.issues_resolved.push(IssueRecord {
            issue,
            solution: solution.into(),
            timestamp: Utc::now(),
        });
    }

    /// Snapshot this session for durable storage, stamped with the current time.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.id.clone(),
            user_data: self.data.clone(),
            end_time: Utc::now(),
        }
    }
}
