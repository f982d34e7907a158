use async_trait::async_trait;

/// A hosted text-completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Complete a single prompt with no separate system instruction.
    async fn chat(&self, message: &str, model: &str, temperature: f64) -> anyhow::Result<String> {
        self.chat_with_system(None, message, model, temperature)
            .await
    }

    async fn chat_with_system(
        &self,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String>;

    /// Warm up the HTTP connection pool (TLS handshake, DNS).
    /// Default implementation is a no-op.
    async fn warmup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
