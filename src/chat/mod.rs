//! Turn orchestration: prompt → provider → cleanup → session update.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::prompt::PromptAssembler;
use crate::providers::{sanitize_api_error, Provider};
use crate::reply::{clean_response, FALLBACK_REPLY};
use crate::sessions::{Role, Session};

/// Result of one chat turn, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub user_name: Option<String>,
}

/// Drives a single conversation turn against a completion provider.
///
/// The session is always passed in by the caller; this type holds no
/// per-conversation state.
pub struct ChatService {
    provider: Arc<dyn Provider>,
    assembler: PromptAssembler,
    model: String,
    temperature: f64,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn Provider>,
        assembler: PromptAssembler,
        model: impl Into<String>,
        temperature: f64,
    ) -> Self {
        Self {
            provider,
            assembler,
            model: model.into(),
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    /// Pre-open provider connections; failures are logged, not returned.
    pub async fn warmup(&self) {
        if let Err(e) = self.provider.warmup().await {
            tracing::warn!("Provider warmup failed (non-fatal): {e}");
        }
    }

    /// Produce a cleaned reply to `input` without touching the session.
    ///
    /// Provider failures are logged and replaced by [`FALLBACK_REPLY`].
    pub async fn generate(&self, session: &Session, input: &str) -> String {
        tracing::info!(session_id = %session.id(), "User: {input}");

        let prompt = self.assembler.assemble(session, input);
        match self
            .provider
            .chat(&prompt, &self.model, self.temperature)
            .await
        {
            Ok(raw) => clean_response(&raw),
            Err(e) => {
                tracing::error!(
                    session_id = %session.id(),
                    model = %self.model,
                    "LLM generation error: {}",
                    sanitize_api_error(&format!("{e:#}"))
                );
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Run a full turn: reply, name extraction, then history append.
    ///
    /// The prompt sees the history as it was before this turn.
    pub async fn respond(&self, session: &mut Session, input: &str) -> ChatReply {
        let response = self.generate(session, input).await;

        session.extract_and_set_name(input);
        session.append_turn(Role::User, input);
        session.append_turn(Role::Assistant, response.clone());

        ChatReply {
            response,
            session_id: session.id().to_string(),
            user_name: session.name().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records prompts and answers from a script; `None` entries fail.
    struct ScriptedProvider {
        prompts: Mutex<Vec<String>>,
        replies: Mutex<Vec<Option<&'static str>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Option<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat_with_system(
            &self,
            _system_prompt: Option<&str>,
            message: &str,
            _model: &str,
            _temperature: f64,
        ) -> anyhow::Result<String> {
            self.prompts.lock().push(message.to_string());
            let mut replies = self.replies.lock();
            let next = if replies.is_empty() { None } else { replies.remove(0) };
            next.map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("provider unavailable: sk-secret123"))
        }
    }

    fn service(provider: Arc<ScriptedProvider>) -> ChatService {
        ChatService::new(provider, PromptAssembler::new("persona", 5), "test-model", 0.7)
    }

    #[tokio::test]
    async fn respond_cleans_reply_and_records_turns() {
        let provider = ScriptedProvider::new(vec![Some("  **Hello** #there#  ")]);
        let chat = service(Arc::clone(&provider));
        let mut session = Session::new("s1");

        let reply = chat.respond(&mut session, "hi").await;

        assert_eq!(reply.response, "Hello there");
        assert_eq!(reply.session_id, "s1");
        assert_eq!(reply.user_name, None);
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].message, "hi");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].message, "Hello there");
    }

    #[tokio::test]
    async fn prompt_uses_history_before_current_turn() {
        let provider = ScriptedProvider::new(vec![Some("first"), Some("second")]);
        let chat = service(Arc::clone(&provider));
        let mut session = Session::new("s");

        chat.respond(&mut session, "one").await;
        chat.respond(&mut session, "two").await;

        let prompts = provider.prompts.lock();
        assert!(!prompts[0].contains("User: one"));
        assert!(prompts[0].ends_with("USER INPUT: one"));
        assert!(prompts[1].contains("User: one\nAssistant: first\n"));
        assert!(!prompts[1].contains("User: two"));
    }

    #[tokio::test]
    async fn provider_failure_yields_fallback_and_still_records() {
        let provider = ScriptedProvider::new(vec![None]);
        let chat = service(Arc::clone(&provider));
        let mut session = Session::new("s");

        let reply = chat.respond(&mut session, "my name is Alice").await;

        assert_eq!(reply.response, FALLBACK_REPLY);
        assert_eq!(reply.user_name.as_deref(), Some("Alice"));
        assert_eq!(session.history()[1].message, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn name_from_later_turn_does_not_override() {
        let provider = ScriptedProvider::new(vec![Some("a"), Some("b")]);
        let chat = service(Arc::clone(&provider));
        let mut session = Session::new("s");

        chat.respond(&mut session, "call me Sam").await;
        let reply = chat.respond(&mut session, "actually my name is Samuel").await;

        assert_eq!(reply.user_name.as_deref(), Some("Sam"));
        assert!(provider.prompts.lock()[1].contains("User name: Sam\n"));
    }

    #[tokio::test]
    async fn generate_leaves_session_untouched() {
        let provider = ScriptedProvider::new(vec![Some("welcome")]);
        let chat = service(Arc::clone(&provider));
        let session = Session::new("s");

        assert_eq!(chat.generate(&session, "hello, my name is Zed").await, "welcome");
        assert!(session.history().is_empty());
        assert!(session.name().is_none());
    }
}
