//! Tracing setup: stderr output plus an optional plain-text log file.

use crate::config::ObservabilityConfig;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins; otherwise the configured filter, falling back to `info`.
pub fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Open `path` for appending, creating its directory first.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

/// Install the global subscriber. Call once, before any other logging.
///
/// A log file that cannot be opened is reported and skipped.
pub fn init_tracing(config: &ObservabilityConfig, log_file: Option<&Path>) -> Result<()> {
    let (file, file_error) = match log_file.map(open_log_file) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let file_layer = file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(e) = file_error {
        tracing::warn!("Log file disabled: {e:#}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_log_file_creates_parent_and_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("chatdesk.log");

        {
            use std::io::Write;
            let mut f = open_log_file(&path).unwrap();
            writeln!(f, "first").unwrap();
            let mut f = open_log_file(&path).unwrap();
            writeln!(f, "second").unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn open_log_file_fails_under_a_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().join("chatdesk.log");
        assert!(open_log_file(&path).is_err());
    }

    #[test]
    fn invalid_filter_falls_back() {
        let config = ObservabilityConfig {
            log_filter: "[[not a filter".into(),
            ..ObservabilityConfig::default()
        };
        // Must not panic regardless of RUST_LOG.
        let _ = build_filter(&config);
    }
}
