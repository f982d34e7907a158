//! Provider subsystem for hosted completion backends.
//!
//! Each provider implements the [`Provider`] trait defined in [`traits`] and is
//! registered in [`create_provider_with_url`] by its canonical string key.
//! [`create_resilient_provider`] wraps the selected provider with a timeout
//! and retry policy.

pub mod compatible;
pub mod gemini;
pub mod reliable;
pub mod traits;

pub use reliable::ReliableProvider;
pub use traits::Provider;

use crate::config::ReliabilityConfig;
use std::time::Duration;

const MAX_API_ERROR_CHARS: usize = 200;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
///
/// Redacts tokens with prefixes like `sk-` (OpenAI) and `AIza` (Google).
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 3] = ["sk-", "AIza", "key="];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{provider} API error ({status}): {sanitized}")
}

/// Resolve API key for a provider from config and environment variables.
fn resolve_provider_credential(name: &str, credential_override: Option<&str>) -> Option<String> {
    if let Some(raw_override) = credential_override {
        let trimmed_override = raw_override.trim();
        if !trimmed_override.is_empty() {
            return Some(trimmed_override.to_owned());
        }
    }

    let provider_env_candidates: &[&str] = match name {
        "gemini" | "google" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "openai" => &["OPENAI_API_KEY"],
        _ => &[],
    };

    for env_var in provider_env_candidates.iter().chain(["CHATDESK_API_KEY", "API_KEY"].iter()) {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Factory: create the right provider from config (without custom URL)
pub fn create_provider(name: &str, api_key: Option<&str>) -> anyhow::Result<Box<dyn Provider>> {
    create_provider_with_url(name, api_key, None)
}

/// Factory: create the right provider from config with optional custom base URL
pub fn create_provider_with_url(
    name: &str,
    api_key: Option<&str>,
    api_url: Option<&str>,
) -> anyhow::Result<Box<dyn Provider>> {
    let resolved_credential = resolve_provider_credential(name, api_key);
    let key = resolved_credential.as_deref();

    match name {
        "gemini" | "google" => Ok(Box::new(gemini::GeminiProvider::with_base_url(api_url, key))),
        "openai" => Ok(Box::new(compatible::OpenAiCompatibleProvider::new(
            "OpenAI",
            api_url.unwrap_or(OPENAI_BASE_URL),
            key,
        ))),
        _ => anyhow::bail!(
            "Unknown provider: {name}. Supported providers: gemini, openai."
        ),
    }
}

/// Create the provider wrapped with timeout and retry behavior.
pub fn create_resilient_provider(
    primary_name: &str,
    api_key: Option<&str>,
    api_url: Option<&str>,
    reliability: &ReliabilityConfig,
) -> anyhow::Result<Box<dyn Provider>> {
    let primary = create_provider_with_url(primary_name, api_key, api_url)?;
    Ok(Box::new(ReliableProvider::new(
        vec![(primary_name.to_string(), primary)],
        reliability.max_retries,
        reliability.base_backoff_ms,
        Duration::from_secs(reliability.request_timeout_secs),
    )))
}

/// Information about a supported provider for display purposes.
pub struct ProviderInfo {
    /// Canonical name used in config (e.g. `"gemini"`)
    pub name: &'static str,
    /// Human-readable display name
    pub display_name: &'static str,
    /// Alternative names accepted in config
    pub aliases: &'static [&'static str],
    /// Default model when none is configured
    pub default_model: &'static str,
}

/// Return the list of all known providers for display in `chatdesk providers`.
pub fn list_providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            name: "gemini",
            display_name: "Google Gemini",
            aliases: &["google"],
            default_model: "gemini-1.5-flash",
        },
        ProviderInfo {
            name: "openai",
            display_name: "OpenAI (or any compatible endpoint via api_url)",
            aliases: &[],
            default_model: "gpt-4o-mini",
        },
    ]
}
