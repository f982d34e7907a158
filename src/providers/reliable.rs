use super::Provider;
use async_trait::async_trait;
use std::time::Duration;

/// Upper bound for a single backoff sleep.
pub(crate) const MAX_BACKOFF_MS: u64 = 10_000;

/// HTTP status from the `(NNN Reason)` segment that `api_error` writes.
fn status_in_message(msg: &str) -> Option<u16> {
    msg.match_indices('(').find_map(|(i, _)| {
        let rest = msg[i + 1..].as_bytes();
        let is_status = rest.len() > 3 && rest[..3].iter().all(u8::is_ascii_digit) && rest[3] == b' ';
        if is_status {
            msg[i + 1..i + 4].parse().ok()
        } else {
            None
        }
    })
}

/// Check if an error is non-retryable (client errors that won't resolve with retries).
fn is_non_retryable(err: &anyhow::Error) -> bool {
    if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
        if let Some(status) = reqwest_err.status() {
            let code = status.as_u16();
            return status.is_client_error() && code != 429 && code != 408;
        }
    }
    let msg = err.to_string();
    if msg.contains("API key not set") {
        return true;
    }
    match status_in_message(&msg) {
        Some(code) => (400..500).contains(&code) && code != 429 && code != 408,
        None => false,
    }
}

/// Provider wrapper with a per-attempt timeout, retry with exponential
/// backoff, and fallback across providers in order.
pub struct ReliableProvider {
    providers: Vec<(String, Box<dyn Provider>)>,
    max_retries: u32,
    base_backoff_ms: u64,
    attempt_timeout: Duration,
}

impl ReliableProvider {
    pub fn new(
        providers: Vec<(String, Box<dyn Provider>)>,
        max_retries: u32,
        base_backoff_ms: u64,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            max_retries,
            base_backoff_ms: base_backoff_ms.max(1),
            attempt_timeout,
        }
    }
}

#[async_trait]
impl Provider for ReliableProvider {
    async fn warmup(&self) -> anyhow::Result<()> {
        for (name, provider) in &self.providers {
            tracing::info!(provider = name, "Warming up provider connection pool");
            if let Err(e) = provider.warmup().await {
                tracing::warn!(provider = name, "Warmup failed (non-fatal): {e}");
            }
        }
        Ok(())
    }

    async fn chat_with_system(
        &self,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String> {
        let mut failures = Vec::new();

        for (provider_name, provider) in &self.providers {
            let mut backoff_ms = self.base_backoff_ms;

            for attempt in 0..=self.max_retries {
                let call = provider.chat_with_system(system_prompt, message, model, temperature);
                let outcome = match tokio::time::timeout(self.attempt_timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "timed out after {}s",
                        self.attempt_timeout.as_secs_f64()
                    )),
                };

                match outcome {
                    Ok(resp) => {
                        if attempt > 0 {
                            tracing::info!(
                                provider = provider_name,
                                model,
                                attempt,
                                "Provider recovered after retry"
                            );
                        }
                        return Ok(resp);
                    }
                    Err(e) => {
                        let non_retryable = is_non_retryable(&e);
                        failures.push(format!(
                            "{provider_name} attempt {}/{}: {e}",
                            attempt + 1,
                            self.max_retries + 1
                        ));

                        if non_retryable {
                            tracing::warn!(
                                provider = provider_name,
                                model,
                                "Non-retryable error, moving on"
                            );
                            break;
                        }

                        if attempt < self.max_retries {
                            tracing::warn!(
                                provider = provider_name,
                                model,
                                attempt = attempt + 1,
                                backoff_ms,
                                "Provider call failed, retrying"
                            );
                            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                            backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                        }
                    }
                }
            }
        }

        anyhow::bail!("All providers failed. Attempts:\n{}", failures.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockProvider {
        calls: Arc<AtomicUsize>,
        fail_until_attempt: usize,
        response: &'static str,
        error: &'static str,
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn chat_with_system(
            &self,
            _system_prompt: Option<&str>,
            _message: &str,
            _model: &str,
            _temperature: f64,
        ) -> anyhow::Result<String> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_until_attempt {
                anyhow::bail!(self.error);
            }
            Ok(self.response.to_string())
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        async fn chat_with_system(
            &self,
            _system_prompt: Option<&str>,
            _message: &str,
            _model: &str,
            _temperature: f64,
        ) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    fn mock(calls: &Arc<AtomicUsize>, fail_until_attempt: usize, error: &'static str) -> Box<dyn Provider> {
        Box::new(MockProvider {
            calls: Arc::clone(calls),
            fail_until_attempt,
            response: "ok",
            error,
        })
    }

    fn reliable(providers: Vec<(String, Box<dyn Provider>)>, retries: u32) -> ReliableProvider {
        ReliableProvider::new(providers, retries, 1, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = reliable(vec![("primary".into(), mock(&calls, 0, "boom"))], 2);

        assert_eq!(provider.chat("hello", "m", 0.0).await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = reliable(vec![("primary".into(), mock(&calls, 1, "temporary"))], 2);

        assert_eq!(provider.chat("hello", "m", 0.0).await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falls_back_after_retries_exhausted() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let provider = reliable(
            vec![
                ("primary".into(), mock(&primary_calls, usize::MAX, "503 unavailable")),
                ("fallback".into(), mock(&fallback_calls, 0, "never")),
            ],
            1,
        );

        assert_eq!(provider.chat("hello", "m", 0.0).await.unwrap(), "ok");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returns_aggregated_error_when_all_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = reliable(vec![("primary".into(), mock(&calls, usize::MAX, "Gemini API error (500 Internal Server Error): boom"))], 2);

        let err = provider.chat("hello", "m", 0.0).await.unwrap_err().to_string();
        assert!(err.contains("All providers failed"));
        assert!(err.contains("primary attempt 3/3"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn skips_retries_on_non_retryable_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = reliable(
            vec![("primary".into(), mock(&calls, usize::MAX, "Gemini API error (401 Unauthorized): bad key"))],
            3,
        );

        assert!(provider.chat("hello", "m", 0.0).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_timeout_counts_as_failure() {
        let provider = ReliableProvider::new(
            vec![("slow".into(), Box::new(SlowProvider))],
            1,
            1,
            Duration::from_millis(20),
        );

        let err = provider.chat("hello", "m", 0.0).await.unwrap_err().to_string();
        assert!(err.contains("timed out"));
        assert!(err.contains("slow attempt 2/2"));
    }

    #[test]
    fn non_retryable_detects_common_patterns() {
        assert!(is_non_retryable(&anyhow::anyhow!("Gemini API error (400 Bad Request): bad")));
        assert!(is_non_retryable(&anyhow::anyhow!("OpenAI API error (403 Forbidden): no")));
        assert!(is_non_retryable(&anyhow::anyhow!("openai API key not set.")));
        assert!(!is_non_retryable(&anyhow::anyhow!("OpenAI API error (429 Too Many Requests): slow")));
        assert!(!is_non_retryable(&anyhow::anyhow!("Gemini API error (408 Request Timeout): x")));
        assert!(!is_non_retryable(&anyhow::anyhow!("Gemini API error (500 Internal Server Error): x")));
        assert!(!is_non_retryable(&anyhow::anyhow!("connection reset")));
    }

    #[test]
    fn port_numbers_in_urls_are_not_statuses() {
        let transport = anyhow::anyhow!(
            "error sending request for url (https://generativelanguage.googleapis.com:443/v1beta/models/m:generateContent): connection reset"
        );
        assert!(!is_non_retryable(&transport));
        assert!(!is_non_retryable(&anyhow::anyhow!("dial tcp 10.0.0.1:404: refused")));
        assert_eq!(status_in_message("x (401 Unauthorized): y"), Some(401));
        assert_eq!(status_in_message("x (https://h:443/p)"), None);
        assert_eq!(status_in_message("x (4011 y)"), None);
    }

    #[tokio::test]
    async fn transport_error_with_port_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = reliable(
            vec![(
                "primary".into(),
                mock(&calls, 1, "error sending request for url (https://api.openai.com:443/v1/chat/completions)"),
            )],
            2,
        );

        assert_eq!(provider.chat("hello", "m", 0.0).await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
