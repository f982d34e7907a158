use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::providers::reliable::MAX_BACKOFF_MS;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level chatdesk configuration, loaded from `config.toml`.
///
/// Resolution order: `CHATDESK_CONFIG_DIR` env → `~/.chatdesk/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Directory holding config.toml - computed, not serialized
    #[serde(skip)]
    pub config_dir: PathBuf,
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the selected provider. Overridden by `CHATDESK_API_KEY` or `API_KEY` env vars.
    pub api_key: Option<String>,
    /// Base URL override for the provider API.
    pub api_url: Option<String>,
    /// Completion provider (`"gemini"` or `"openai"`). Default: `"gemini"`.
    pub default_provider: Option<String>,
    /// Model routed through the selected provider. Default: `"gemini-1.5-flash"`.
    pub default_model: Option<String>,
    /// Model temperature (0.0–2.0). Default: `0.7`.
    pub default_temperature: f64,

    /// Provider timeout and retry policy (`[reliability]`).
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// HTTP gateway configuration (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session history, prompt window and transcript logging (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Log filtering and the log file sink (`[observability]`).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Reliability ──────────────────────────────────────────────────

/// Provider call policy (`[reliability]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReliabilityConfig {
    /// Timeout for a single provider attempt, in seconds. Default: `60`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries after the first failed attempt. Default: `2`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff between retries, doubled each time. Default: `500`.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_backoff_ms() -> u64 {
    500
}

impl ReliabilityConfig {
    /// Longest one provider call can take: every attempt timing out plus
    /// every backoff sleep between attempts.
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let mut backoff_ms = self.base_backoff_ms.max(1);
        let mut total_backoff_ms: u64 = 0;
        for sleep in 0..self.max_retries {
            if backoff_ms == MAX_BACKOFF_MS {
                let remaining = u64::from(self.max_retries - sleep);
                total_backoff_ms =
                    total_backoff_ms.saturating_add(remaining.saturating_mul(MAX_BACKOFF_MS));
                break;
            }
            total_backoff_ms = total_backoff_ms.saturating_add(backoff_ms);
            backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
        }

        Duration::from_secs(self.request_timeout_secs.saturating_mul(attempts))
            .saturating_add(Duration::from_millis(total_backoff_ms))
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Gateway port (default: 5000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Maximum accepted request body in bytes (default: 65536)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Whole-request timeout in seconds (default: 240). Must exceed the
    /// worst-case provider time from `[reliability]`.
    #[serde(default = "default_gateway_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Answer CORS preflights for any origin (default: true)
    #[serde(default = "default_true")]
    pub allow_any_origin: bool,
}

fn default_gateway_port() -> u16 {
    5000
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_max_body_bytes() -> usize {
    65_536
}

fn default_gateway_request_timeout_secs() -> u64 {
    240
}

fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_gateway_request_timeout_secs(),
            allow_any_origin: true,
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────

/// Session behavior (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionsConfig {
    /// Conversation turns retained per session. Default: `20`.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// Recent turns included in each provider request. Default: `5`.
    #[serde(default = "default_prompt_history_window")]
    pub prompt_history_window: usize,
    /// Transcript directory; relative paths resolve under the config dir. Default: `"logs"`.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Optional file replacing the built-in persona text.
    #[serde(default)]
    pub persona_path: Option<String>,
    /// Name shown for replies in the terminal chat. Default: `"Assistant"`.
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    /// Persist every live session when the gateway shuts down. Default: `true`.
    #[serde(default = "default_true")]
    pub save_on_shutdown: bool,
}

fn default_max_history_messages() -> usize {
    crate::sessions::MAX_HISTORY_MESSAGES
}

fn default_prompt_history_window() -> usize {
    crate::prompt::DEFAULT_PROMPT_WINDOW
}

fn default_log_dir() -> String {
    "logs".into()
}

fn default_assistant_name() -> String {
    "Assistant".into()
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
            prompt_history_window: default_prompt_history_window(),
            log_dir: default_log_dir(),
            persona_path: None,
            assistant_name: default_assistant_name(),
            save_on_shutdown: true,
        }
    }
}

// ── Observability ────────────────────────────────────────────────

/// Logging configuration (`[observability]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservabilityConfig {
    /// Default tracing filter when `RUST_LOG` is unset. Default: `"info"`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Log file name inside the transcript directory; empty disables it.
    /// Default: `"chatdesk.log"`.
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_log_file() -> String {
    "chatdesk.log".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            log_file: default_log_file(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir().unwrap_or_else(|_| PathBuf::from(".chatdesk"));

        Self {
            config_path: config_dir.join("config.toml"),
            config_dir,
            api_key: None,
            api_url: None,
            default_provider: Some("gemini".to_string()),
            default_model: Some("gemini-1.5-flash".to_string()),
            default_temperature: 0.7,
            reliability: ReliabilityConfig::default(),
            gateway: GatewayConfig::default(),
            sessions: SessionsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".chatdesk"))
}

fn resolve_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("CHATDESK_CONFIG_DIR") {
        let dir = dir.trim();
        if !dir.is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(dir).as_ref()));
        }
    }
    default_config_dir()
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = resolve_config_dir()?;
        Self::load_or_init_in(&config_dir).await
    }

    /// Load `config.toml` from `config_dir`, writing defaults if it is missing.
    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_dir = config_dir.to_path_buf();
            config.config_path = config_path.clone();
            config.save().await?;

            // Restrict permissions on newly created config file (may contain API keys)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_dir = config_dir.to_path_buf();
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Provider name with the default applied.
    pub fn provider_name(&self) -> &str {
        self.default_provider.as_deref().unwrap_or("gemini")
    }

    /// Model name with the default applied.
    pub fn model_name(&self) -> &str {
        self.default_model.as_deref().unwrap_or("gemini-1.5-flash")
    }

    /// Absolute transcript directory (`~` expanded, relative to the config dir).
    pub fn log_dir(&self) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.sessions.log_dir).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            self.config_dir.join(expanded)
        }
    }

    /// Persona override path, `~` expanded and relative to the config dir.
    pub fn persona_path(&self) -> Option<PathBuf> {
        let raw = self.sessions.persona_path.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
        Some(if expanded.is_absolute() {
            expanded
        } else {
            self.config_dir.join(expanded)
        })
    }

    /// Log file path, if the file sink is enabled.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        let name = self.observability.log_file.trim();
        if name.is_empty() {
            None
        } else {
            Some(self.log_dir().join(name))
        }
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.request_timeout_secs == 0 {
            anyhow::bail!("gateway.request_timeout_secs must be greater than 0");
        }
        if !(0.0..=2.0).contains(&self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be between 0.0 and 2.0 (got {})",
                self.default_temperature
            );
        }
        if self.reliability.request_timeout_secs == 0 {
            anyhow::bail!("reliability.request_timeout_secs must be greater than 0");
        }
        let provider_budget = self.reliability.worst_case_duration();
        if Duration::from_secs(self.gateway.request_timeout_secs) <= provider_budget {
            anyhow::bail!(
                "gateway.request_timeout_secs ({}) must exceed the worst-case provider time of {:.1}s \
                 (reliability.request_timeout_secs x (max_retries + 1) plus backoff)",
                self.gateway.request_timeout_secs,
                provider_budget.as_secs_f64()
            );
        }
        if self.sessions.max_history_messages == 0 {
            anyhow::bail!("sessions.max_history_messages must be greater than 0");
        }
        if self.sessions.prompt_history_window > self.sessions.max_history_messages {
            anyhow::bail!(
                "sessions.prompt_history_window ({}) must not exceed sessions.max_history_messages ({})",
                self.sessions.prompt_history_window,
                self.sessions.max_history_messages
            );
        }
        if self.sessions.log_dir.trim().is_empty() {
            anyhow::bail!("sessions.log_dir must not be empty");
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API Key: CHATDESK_API_KEY or API_KEY (generic)
        if let Ok(key) = std::env::var("CHATDESK_API_KEY").or_else(|_| std::env::var("API_KEY")) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }

        if let Ok(provider) = std::env::var("CHATDESK_PROVIDER") {
            if !provider.is_empty() {
                self.default_provider = Some(provider);
            }
        }

        if let Ok(model) = std::env::var("CHATDESK_MODEL") {
            if !model.is_empty() {
                self.default_model = Some(model);
            }
        }

        if let Ok(temp_str) = std::env::var("CHATDESK_TEMPERATURE") {
            if let Ok(temp) = temp_str.parse::<f64>() {
                if (0.0..=2.0).contains(&temp) {
                    self.default_temperature = temp;
                }
            }
        }

        // Gateway port: CHATDESK_GATEWAY_PORT or PORT
        if let Ok(port_str) =
            std::env::var("CHATDESK_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Gateway host: CHATDESK_GATEWAY_HOST or HOST
        if let Ok(host) = std::env::var("CHATDESK_GATEWAY_HOST").or_else(|_| std::env::var("HOST"))
        {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }

        if let Ok(dir) = std::env::var("CHATDESK_LOG_DIR") {
            if !dir.is_empty() {
                self.sessions.log_dir = dir;
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await?;
        Ok(())
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
