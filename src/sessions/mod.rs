//! Session management: per-user conversation state, history and transcripts.

pub mod in_memory;
pub mod logger;
pub mod name;
pub mod session;
pub mod traits;

pub use in_memory::InMemorySessionStore;
pub use logger::{is_safe_session_id, SessionLogger};
pub use name::extract_name;
pub use session::{generate_session_id, Session, MAX_HISTORY_MESSAGES};
pub use traits::{
    IssueRecord, Preferences, Role, SessionHandle, SessionRecord, SessionStore, Turn, UserData,
};

/// Create a default in-memory session store.
pub fn create_session_store(history_limit: usize) -> Box<dyn SessionStore> {
    Box::new(InMemorySessionStore::with_history_limit(history_limit))
}
