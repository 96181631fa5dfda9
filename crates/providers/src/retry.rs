//! Bounded retries with exponential backoff and a per-call timeout.
//!
//! Wraps any provider. Each attempt runs under `tokio::time::timeout`;
//! an elapsed timer becomes `ProviderError::Timeout`. Transient failures
//! (network, timeout, 429, 5xx) are retried up to `max_retries` times,
//! everything else is returned immediately.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::error::ProviderError;
use switchboard_core::provider::*;
use tracing::{debug, warn};

/// A provider wrapper that retries transient failures.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self {
            inner,
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }

    /// Retries after the first attempt. Zero disables retrying.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry number `attempt + 1`.
    ///
    /// Doubles from the base delay, but never waits less than a
    /// provider-supplied retry-after.
    fn backoff(&self, attempt: u32, error: &ProviderError) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                exponential.max(Duration::from_secs(*retry_after_secs))
            }
            _ => exponential,
        }
    }

    fn timeout_error(&self) -> ProviderError {
        ProviderError::Timeout(format!(
            "Provider '{}' did not respond within {}ms",
            self.inner.name(),
            self.timeout.as_millis()
        ))
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            let attempt_result =
                tokio::time::timeout(self.timeout, self.inner.complete(request.clone())).await;
            let error = match attempt_result {
                Ok(Ok(response)) => {
                    if attempt > 0 {
                        debug!(
                            provider = %self.inner.name(),
                            attempt,
                            "Provider call succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Ok(Err(e)) => e,
                Err(_) => self.timeout_error(),
            };

            if !error.is_transient() || attempt >= self.max_retries {
                warn!(
                    provider = %self.inner.name(),
                    attempts = attempt + 1,
                    error = %error,
                    "Provider call failed"
                );
                return Err(error);
            }

            let delay = self.backoff(attempt, &error);
            warn!(
                provider = %self.inner.name(),
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient provider error, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Retries opening the stream. Errors after the first chunk are not retried.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let mut attempt = 0;
        loop {
            let attempt_result =
                tokio::time::timeout(self.timeout, self.inner.stream(request.clone())).await;
            let error = match attempt_result {

                Ok(Ok(rx)) => return Ok(rx),
                Ok(Err(e)) => e,
                Err(_) => self.timeout_error(),
            };

            if !error.is_transient() || attempt >= self.max_retries {
                warn!(
                    provider = %self.inner.name(),
                    attempts = attempt + 1,
                    error = %error,
                    "Provider stream failed"
                );
                return Err(error);
            }

            let delay = self.backoff(attempt, &error);
            warn!(
                provider = %self.inner.name(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient provider stream error, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, self.inner.embed(request)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use switchboard_core::message::Message;

    /// Replays a fixed script of outcomes, one per call.
    struct ScriptedProvider {
        script: Mutex<Vec<std::result::Result<ProviderResponse, ProviderError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(mut script: Vec<std::result::Result<ProviderResponse, ProviderError>>) -> Self {
            script.reverse();
            Self { script: Mutex::new(script), calls: AtomicU32::new(0), delay: Duration::ZERO }
        }

        fn slow(delay: Duration) -> Self {
            Self { script: Mutex::new(Vec::new()), calls: AtomicU32::new(0), delay }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into())))
        }
    }

    fn ok(text: &str) -> std::result::Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: None,
            cost_usd: 0.0,
            finish_reason: Some("stop".into()),
            model: "mock".into(),
        })
    }

    fn request() -> ProviderRequest {
        ProviderRequest::new("mock", vec![Message::user("hello")])
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("connection reset".into())),
            Err(ProviderError::ApiError { status_code: 502, message: "bad gateway".into() }),
            ok("done"),
        ]));
        let provider = RetryingProvider::new(inner.clone()).with_max_retries(3);
        let resp = provider.complete(request()).await.unwrap();
        assert_eq!(resp.message.content, "done");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            ok("unreachable"),
        ]));
        let provider = RetryingProvider::new(inner.clone()).with_max_retries(3);
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("1".into())),
            Err(ProviderError::Network("2".into())),
            Err(ProviderError::Network("3".into())),
            ok("too late"),
        ]));
        let provider = RetryingProvider::new(inner.clone()).with_max_retries(2);
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(msg) if msg == "3"));
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_surface_typed_timeout() {
        let inner = Arc::new(ScriptedProvider::slow(Duration::from_secs(60)));
        let provider = RetryingProvider::new(inner.clone())
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(1);
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(inner.calls(), 2);
    }

    #[test]
    fn backoff_doubles_and_respects_retry_after() {
        let provider = RetryingProvider::new(Arc::new(ScriptedProvider::new(vec![])))
            .with_base_delay(Duration::from_millis(100));
        let net = ProviderError::Network("x".into());
        assert_eq!(provider.backoff(0, &net), Duration::from_millis(100));
        assert_eq!(provider.backoff(2, &net), Duration::from_millis(400));
        let limited = ProviderError::RateLimited { retry_after_secs: 3 };
        assert_eq!(provider.backoff(0, &limited), Duration::from_secs(3));
    }
}
