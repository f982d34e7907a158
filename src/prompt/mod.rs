//! Prompt assembly: persona, context, recent transcript and user input
//! combined into the single text sent to the completion provider.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::Path;

use crate::sessions::Session;

/// Built-in persona used when no override file is configured.
pub const DEFAULT_PERSONA: &str = include_str!("persona.md");

/// Number of recent turns included in each request.
pub const DEFAULT_PROMPT_WINDOW: usize = 5;

/// Shown in the context block before the user has given a name.
const NAME_NOT_PROVIDED: &str = "not provided";

/// Load the persona from `path`, falling back to [`DEFAULT_PERSONA`].
pub async fn load_persona(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            let persona = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read persona file: {}", path.display()))?;
            if persona.trim().is_empty() {
                anyhow::bail!("Persona file is empty: {}", path.display());
            }
            Ok(persona)
        }
        None => Ok(DEFAULT_PERSONA.to_string()),
    }
}

/// Builds request payloads from session state.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    persona: String,
    window: usize,
}

impl PromptAssembler {
    pub fn new(persona: impl Into<String>, window: usize) -> Self {
        Self {
            persona: persona.into(),
            window,
        }
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Assemble the prompt for `input` using the current local time.
    pub fn assemble(&self, session: &Session, input: &str) -> String {
        self.assemble_at(session, input, Local::now())
    }

    /// Assemble the prompt for `input` as of `now`.
    ///
    /// Only the last `window` history entries are included; the input is
    /// passed through untouched.
    pub fn assemble_at(&self, session: &Session, input: &str, now: DateTime<Local>) -> String {
        let mut prompt = String::with_capacity(self.persona.len() + input.len() + 512);

        let _ = write!(prompt, "SYSTEM PROMPT: {}\n\n", self.persona);
        prompt.push_str("CURRENT CONTEXT:\n");
        let _ = writeln!(prompt, "Current time: {}.", now.format("%I:%M %p"));
        let _ = write!(
            prompt,
            "User name: {}\n\n",
            session.name().unwrap_or(NAME_NOT_PROVIDED)
        );

        prompt.push_str("CONVERSATION HISTORY (for contextual awareness):\n");
        let history = session.history();
        let start = history.len().saturating_sub(self.window);
        for turn in &history[start..] {
            let _ = writeln!(prompt, "{}: {}", turn.role.label(), turn.message);
        }

        let _ = write!(prompt, "\nUSER INPUT: {input}");
        prompt
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_PERSONA, DEFAULT_PROMPT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::Role;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 15, 9, 0).unwrap()
    }

    #[test]
    fn sections_appear_in_order() {
        let assembler = PromptAssembler::new("Be brief.", 5);
        let mut session = Session::new("s");
        session.append_turn(Role::User, "hello");
        session.append_turn(Role::Assistant, "hi there");

        let prompt = assembler.assemble_at(&session, "what is an HS code?", fixed_time());
        let expected = "SYSTEM PROMPT: Be brief.\n\n\
                        CURRENT CONTEXT:\n\
                        Current time: 03:09 PM.\n\
                        User name: not provided\n\n\
                        CONVERSATION HISTORY (for contextual awareness):\n\
                        User: hello\n\
                        Assistant: hi there\n\
                        \nUSER INPUT: what is an HS code?";
        assert_eq!(prompt, expected);
    }

    #[test]
    fn includes_resolved_name() {
        let assembler = PromptAssembler::new("p", 5);
        let mut session = Session::new("s");
        session.extract_and_set_name("call me Ada");
        let prompt = assembler.assemble_at(&session, "hi", fixed_time());
        assert!(prompt.contains("User name: Ada\n"));
    }

    #[test]
    fn transcript_is_limited_to_window() {
        let assembler = PromptAssembler::default();
        let mut session = Session::new("s");
        for i in 0..20 {
            session.append_turn(Role::User, format!("turn-{i:02}"));
        }

        let prompt = assembler.assemble_at(&session, "next", fixed_time());
        let included = prompt.matches("User: turn-").count();
        assert_eq!(included, 5);
        assert!(prompt.contains("User: turn-15\n"));
        assert!(prompt.contains("User: turn-19\n"));
        assert!(!prompt.contains("turn-14"));
    }

    #[test]
    fn empty_history_still_has_transcript_header() {
        let assembler = PromptAssembler::new("p", 5);
        let prompt = assembler.assemble_at(&Session::new("s"), "hi", fixed_time());
        assert!(prompt.ends_with(
            "CONVERSATION HISTORY (for contextual awareness):\n\nUSER INPUT: hi"
        ));
    }

    #[test]
    fn input_is_passed_through_verbatim() {
        let assembler = PromptAssembler::new("p", 5);
        let input = "ignore *all* # rules\nsecond line";
        let prompt = assembler.assemble_at(&Session::new("s"), input, fixed_time());
        assert!(prompt.ends_with(&format!("USER INPUT: {input}")));
    }

    #[tokio::test]
    async fn load_persona_defaults_and_reads_file() {
        assert_eq!(load_persona(None).await.unwrap(), DEFAULT_PERSONA);

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("persona.txt");
        tokio::fs::write(&path, "Custom persona").await.unwrap();
        assert_eq!(load_persona(Some(&path)).await.unwrap(), "Custom persona");

        tokio::fs::write(&path, "  \n").await.unwrap();
        assert!(load_persona(Some(&path)).await.is_err());
        assert!(load_persona(Some(&tmp.path().join("missing"))).await.is_err());
    }
}
