//! Retry, backoff, and deadline orchestration for generation calls.
//!
//! Each request walks the state machine
//! `Pending → InFlight → {Succeeded, Failed, TimedOut}`. Transient backend
//! failures are retried with exponential backoff plus jitter up to
//! `max_retries`; non-transient failures propagate immediately. The overall
//! deadline is enforced across attempts *and* backoff sleeps: when it would
//! elapse, the call fails with `GenerationTimeout` instead of continuing to
//! retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use ragline_core::error::{PipelineError, Result};
use ragline_core::generate::{EventStream, GenerateOptions, GenerationBackend};
use ragline_core::models::Answer;

use crate::config::GenerationConfig;

/// Retry schedule for transient generation failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): exponential growth
    /// capped at `max_delay`, with multiplicative jitter in `[0.5, 1.5)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX))
            .min(self.max_delay);
        if self.jitter {
            exp.mul_f64(0.5 + rand::random::<f64>())
        } else {
            exp
        }
    }
}

/// Per-request lifecycle, surfaced through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    TimedOut,
}

/// Wraps a [`GenerationBackend`] with retry and deadline semantics.
pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
    deadline: Duration,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy, deadline: Duration) -> Self {
        Self {
            backend,
            policy,
            deadline,
        }
    }

    pub fn from_config(backend: Arc<dyn GenerationBackend>, config: &GenerationConfig) -> Self {
        Self::new(
            backend,
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
                max_delay: Duration::from_millis(config.max_delay_ms),
                jitter: true,
            },
            Duration::from_secs(config.deadline_secs),
        )
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// Request/response generation with retries and a hard deadline.
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Answer> {
        let backend = self.backend.clone();
        let prompt = prompt.to_string();
        let options = options.clone();
        self.run(move || {
            let backend = backend.clone();
            let prompt = prompt.clone();
            let options = options.clone();
            async move { backend.generate(&prompt, &options).await }
        })
        .await
    }

    /// Establish a generation stream. Retries and the deadline apply to
    /// establishing the stream; once events flow, the stream is the
    /// caller's to consume or cancel (dropping it releases the
    /// connection).
    pub async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<EventStream> {
        let backend = self.backend.clone();
        let prompt = prompt.to_string();
        let options = options.clone();
        self.run(move || {
            let backend = backend.clone();
            let prompt = prompt.clone();
            let options = options.clone();
            async move { backend.generate_stream(&prompt, &options).await }
        })
        .await
    }

    async fn run<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut state = RequestState::Pending;
        let mut attempts = 0u32;
        debug!(model = self.backend.model_id(), ?state, "generation request");

        loop {
            let Some(remaining) = self.deadline.checked_sub(started.elapsed()) else {
                state = RequestState::TimedOut;
                debug!(?state, attempts, "deadline elapsed before attempt");
                return Err(PipelineError::GenerationTimeout { attempts });
            };

            attempts += 1;
            state = RequestState::InFlight;
            debug!(?state, attempts);

            let outcome = tokio::time::timeout(remaining, call()).await;

            match outcome {
                Err(_) => {
                    state = RequestState::TimedOut;
                    debug!(?state, attempts);
                    return Err(PipelineError::GenerationTimeout { attempts });
                }
                Ok(Ok(value)) => {
                    state = RequestState::Succeeded;
                    debug!(?state, attempts, elapsed_ms = started.elapsed().as_millis() as u64);
                    return Ok(value);
                }
                Ok(Err(err)) if err.retryable() && attempts <= self.policy.max_retries => {
                    let delay = self.policy.backoff_delay(attempts - 1);
                    if started.elapsed() + delay >= self.deadline {
                        state = RequestState::TimedOut;
                        debug!(?state, attempts, "deadline would elapse during backoff");
                        return Err(PipelineError::GenerationTimeout { attempts });
                    }
                    warn!(
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient generation failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(err)) => {
                    state = RequestState::Failed;
                    debug!(?state, attempts, error = %err);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragline_core::models::{FinishReason, Usage};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBackend {
        calls: AtomicU32,
        succeed_after: u32,
        retryable: bool,
    }

    #[async_trait]
    impl GenerationBackend for FlakyBackend {
        fn model_id(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<Answer> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.succeed_after {
                if self.retryable {
                    Err(PipelineError::RetryableGeneration {
                        detail: format!("transient failure {}", n),
                    })
                } else {
                    Err(PipelineError::NonRetryableGeneration {
                        detail: "bad request".to_string(),
                    })
                }
            } else {
                Ok(Answer {
                    text: "ok".to_string(),
                    finish_reason: FinishReason::Stop,
                    usage: Usage::default(),
                })
            }
        }

        async fn generate_stream(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<EventStream> {
            Err(PipelineError::NonRetryableGeneration {
                detail: "not used".to_string(),
            })
        }
    }

    fn orchestrator(backend: Arc<FlakyBackend>, max_retries: u32, deadline: Duration) -> Orchestrator {
        Orchestrator::new(
            backend,
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
            },
            deadline,
        )
    }

    #[tokio::test]
    async fn always_failing_backend_makes_exactly_initial_plus_retries_attempts() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
            retryable: true,
        });
        let orch = orchestrator(backend.clone(), 3, Duration::from_secs(30));

        let err = orch
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert!(err.retryable());
        assert!(matches!(err, PipelineError::RetryableGeneration { .. }));
    }

    #[tokio::test]
    async fn recovers_within_retry_budget() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            succeed_after: 2,
            retryable: true,
        });
        let orch = orchestrator(backend.clone(), 3, Duration::from_secs(30));

        let answer = orch.generate("p", &GenerateOptions::default()).await.unwrap();
        assert_eq!(answer.text, "ok");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_propagates_immediately() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
            retryable: false,
        });
        let orch = orchestrator(backend.clone(), 3, Duration::from_secs(30));

        let err = orch
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NonRetryableGeneration { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_shorter_than_backoff_times_out_before_retries_exhaust() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
            retryable: true,
        });
        let orch = Orchestrator::new(
            backend.clone(),
            RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(10),
                jitter: false,
            },
            Duration::from_millis(50),
        );

        let err = orch
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationTimeout { .. }));
        // Timed out during the first backoff, long before 6 attempts.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn jittered_backoff_stays_in_band() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.backoff_delay(0);
            assert!(d >= Duration::from_millis(50) && d < Duration::from_millis(150));
        }
    }
}
