//! An ordered fallback chain over [`EmbeddingProvider`]s, with a
//! per-provider availability cache and rate-limit cooldown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::retry::{RetryPolicy, Retryable};
use super::{EmbeddingProvider, ProviderTag};
use crate::{Error, Result};

#[derive(Default)]
struct AvailabilityState {
    /// Set after a successful call; fast-pathed as available until this
    /// instant without re-probing.
    available_until: Option<Instant>,
    /// Set after a rate-limit response; the provider is skipped without
    /// being called until this instant passes.
    unavailable_until: Option<Instant>,
}

fn classify(err: &Error) -> Retryable {
    match err {
        Error::RateLimited { .. } => Retryable::No,
        Error::ProviderUnavailable(_) => Retryable::Yes,
        _ => Retryable::No,
    }
}

/// Walks an ordered list of providers on failure, tracking attempts
/// against each provider's stable [`ProviderTag`] rather than its type.
pub struct ProviderChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    retry_policy: RetryPolicy,
    availability_ttl: Duration,
    state: Mutex<BTreeMap<ProviderTag, AvailabilityState>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            providers,
            retry_policy: RetryPolicy::default(),
            availability_ttl: Duration::from_secs(60),
            state: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_availability_ttl(mut self, ttl: Duration) -> Self {
        self.availability_ttl = ttl;
        self
    }

    /// Embed `text` with `model`, walking the chain in order. Each
    /// provider gets the full retry policy before the chain moves to the
    /// next one. If every provider fails, returns
    /// [`Error::AllProvidersFailed`] with one entry per attempted
    /// provider.
    pub async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let mut errors: Vec<(ProviderTag, String)> = Vec::new();
        let now = Instant::now();

        for provider in &self.providers {
            let tag = provider.tag();

            {
                let state = self.state.lock();
                if let Some(s) = state.get(&tag) {
                    if let Some(until) = s.unavailable_until {
                        if now < until {
                            errors.push((
                                tag,
                                "rate limited, skipping until cooldown expires".to_owned(),
                            ));
                            continue;
                        }
                    }
                }
            }

            let fast_path_available = {
                let state = self.state.lock();
                state
                    .get(&tag)
                    .and_then(|s| s.available_until)
                    .map(|until| now < until)
                    .unwrap_or(false)
            };

            if !fast_path_available && !provider.is_available().await {
                errors.push((tag, "provider unavailable".to_owned()));
                continue;
            }

            let result = self
                .retry_policy
                .run(
                    |_attempt| provider.embed(text, model),
                    classify,
                    |d| tokio::time::sleep(d),
                )
                .await;

            match result {
                Ok(vector) => {
                    let mut state = self.state.lock();
                    state.entry(tag).or_default().available_until =
                        Some(Instant::now() + self.availability_ttl);
                    return Ok(vector);
                }
                Err(Error::RateLimited { retry_after_secs }) => {
                    let mut state = self.state.lock();
                    state.entry(tag).or_default().unavailable_until =
                        Some(Instant::now() + Duration::from_secs(retry_after_secs));
                    errors.push((
                        tag,
                        format!("rate limited, retry after {retry_after_secs}s"),
                    ));
                }
                Err(e) => {
                    errors.push((tag, e.to_string()));
                }
            }
        }

        Err(Error::AllProvidersFailed(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        tag: ProviderTag,
        available: bool,
        fail_times: AtomicU32,
        error: fn() -> Error,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn tag(&self) -> ProviderTag {
            self.tag
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f32>> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                Err((self.error)())
            } else {
                Ok(vec![1.0, 2.0])
            }
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_on_unavailability() {
        let down = Arc::new(FlakyProvider {
            tag: ProviderTag::Ollama,
            available: false,
            fail_times: AtomicU32::new(0),
            error: || Error::ProviderUnavailable("down".into()),
        });
        let up = Arc::new(FlakyProvider {
            tag: ProviderTag::OpenAiCompatible,
            available: true,
            fail_times: AtomicU32::new(0),
            error: || Error::ProviderUnavailable("down".into()),
        });
        let chain = ProviderChain::new(vec![down, up]);
        let result = chain.embed("hello", "model").await.unwrap();
        assert_eq!(result, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn all_providers_failed_aggregates_errors() {
        let a = Arc::new(FlakyProvider {
            tag: ProviderTag::Ollama,
            available: false,
            fail_times: AtomicU32::new(0),
            error: || Error::ProviderUnavailable("down".into()),
        });
        let b = Arc::new(FlakyProvider {
            tag: ProviderTag::OpenAiCompatible,
            available: false,
            fail_times: AtomicU32::new(0),
            error: || Error::ProviderUnavailable("down".into()),
        });
        let chain = ProviderChain::new(vec![a, b]);
        let err = chain.embed("hello", "model").await.unwrap_err();
        match err {
            Error::AllProvidersFailed(attempts) => {
                assert_eq!(attempts.len(), 2);
                // Order must equal the order the chain attempted them in.
                assert_eq!(attempts[0].0, ProviderTag::Ollama);
                assert_eq!(attempts[1].0, ProviderTag::OpenAiCompatible);
            }
            other => panic!("expected AllProvidersFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_within_a_provider_before_falling_back() {
        let retry_then_ok = Arc::new(FlakyProvider {
            tag: ProviderTag::Ollama,
            available: true,
            fail_times: AtomicU32::new(1),
            error: || Error::ProviderUnavailable("transient".into()),
        });
        let chain = ProviderChain::new(vec![retry_then_ok])
            .with_retry_policy(RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            });
        let result = chain.embed("hello", "model").await.unwrap();
        assert_eq!(result, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn rate_limit_marks_provider_unavailable_for_window() {
        let limited = Arc::new(FlakyProvider {
            tag: ProviderTag::Ollama,
            available: true,
            fail_times: AtomicU32::new(100),
            error: || Error::RateLimited {
                retry_after_secs: 3600,
            },
        });
        let chain = ProviderChain::new(vec![limited]).with_retry_policy(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        });
        let err1 = chain.embed("hello", "model").await.unwrap_err();
        assert!(matches!(err1, Error::AllProvidersFailed(_)));

        // Second call should skip the provider entirely (cooldown), not
        // invoke embed again — fail_times would otherwise have dropped.
        let err2 = chain.embed("hello", "model").await.unwrap_err();
        if let Error::AllProvidersFailed(attempts) = err2 {
            assert_eq!(attempts[0].0, ProviderTag::Ollama);
            assert!(attempts[0].1.contains("rate limited"));
        } else {
            panic!("expected AllProvidersFailed");
        }
    }
}
