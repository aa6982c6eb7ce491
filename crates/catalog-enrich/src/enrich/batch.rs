//! Chunked execution with bounded retry for bulk statements
//!
//! One executor serves every persistence step: the caller supplies the statement as a
//! closure over a chunk, the executor splits the input and retries a chunk on transient
//! errors with linear backoff (`base_delay * attempt`). A permanent error, or a transient
//! one that outlives the retry budget, aborts the whole operation.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::StoreResult;
use crate::error::{EnrichError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Postgres accepts at most 65535 bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;
/// Binds per row of the widest statement (the book update)
pub const MAX_BINDS_PER_ROW: usize = 7;
/// Largest chunk every persistence statement can bind
pub const MAX_CHUNK_SIZE: usize = MAX_BIND_PARAMS / MAX_BINDS_PER_ROW;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, first try included
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait before the attempt following `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    chunk_size: usize,
    retry: RetryPolicy,
}

impl BatchExecutor {
    pub fn new(chunk_size: usize, retry: RetryPolicy) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
            retry,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run `statement` over `items` one chunk at a time, returning each chunk's output
    ///
    /// Empty input runs nothing.
    pub async fn run<'a, T, R, F, Fut>(
        &self,
        operation: &'static str,
        items: &'a [T],
        mut statement: F,
    ) -> Result<Vec<R>>
    where
        F: FnMut(&'a [T]) -> Fut,
        Fut: Future<Output = StoreResult<R>>,
    {
        let mut outputs = Vec::with_capacity(items.len().div_ceil(self.chunk_size));

        for (index, chunk) in items.chunks(self.chunk_size).enumerate() {
            let mut attempt = 1;
            let output = loop {
                match statement(chunk).await {
                    Ok(output) => break output,
                    Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            operation,
                            chunk = index,
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Sub-batch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    },
                    Err(source) => {
                        return Err(EnrichError::Persist {
                            operation,
                            chunk: index,
                            attempts: attempt,
                            source,
                        });
                    },
                }
            };

            debug!(operation, chunk = index, rows = chunk.len(), "Sub-batch applied");
            outputs.push(output);
        }

        Ok(outputs)
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::store::StoreError;
    use tokio::time::Instant;

    fn executor(chunk_size: usize, max_attempts: u32) -> BatchExecutor {
        BatchExecutor::new(chunk_size, RetryPolicy::new(max_attempts, Duration::from_millis(500)))
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let executor = BatchExecutor::new(0, RetryPolicy::new(0, Duration::ZERO));
        assert_eq!(executor.chunk_size(), 1);
        assert_eq!(executor.retry.max_attempts, 1);
    }

    #[test]
    fn test_chunk_size_capped_at_bind_limit() {
        let executor = BatchExecutor::new(50_000, RetryPolicy::default());
        assert_eq!(executor.chunk_size(), MAX_CHUNK_SIZE);
        assert!(MAX_CHUNK_SIZE * MAX_BINDS_PER_ROW <= MAX_BIND_PARAMS);
    }

    #[tokio::test]
    async fn test_chunks_in_order() {
        let items: Vec<u32> = (1..=7).collect();
        let mut seen = Vec::new();

        let sums = executor(3, 1)
            .run("sum", &items, |chunk| {
                seen.push(chunk.to_vec());
                async move { Ok::<_, StoreError>(chunk.iter().sum::<u32>()) }
            })
            .await
            .unwrap();

        assert_eq!(sums, vec![6, 15, 7]);
        assert_eq!(seen, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[tokio::test]
    async fn test_empty_input_runs_nothing() {
        let items: Vec<u32> = Vec::new();
        let mut calls = 0;
        let outputs = executor(10, 3)
            .run("noop", &items, |_| {
                calls += 1;
                async { Ok::<_, StoreError>(()) }
            })
            .await
            .unwrap();

        assert!(outputs.is_empty());
        assert_eq!(calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_with_backoff() {
        let items = vec![1, 2];
        let mut calls = 0;
        let started = Instant::now();

        let outputs = executor(10, 3)
            .run("flaky", &items, |chunk| {
                calls += 1;
                let fail = calls < 3;
                async move {
                    if fail {
                        Err(StoreError::Transient("deadlock".into()))
                    } else {
                        Ok(chunk.len())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outputs, vec![2]);
        assert_eq!(calls, 3);
        // 500ms after the first failure, 1000ms after the second
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1500), "waited {waited:?}");
        assert!(waited < Duration::from_millis(1600), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate() {
        let items = vec![1, 2, 3, 4];
        let mut calls = 0;

        let err = executor(2, 3)
            .run("stuck", &items, |chunk| {
                calls += 1;
                let first = chunk[0] == 1;
                async move {
                    if first {
                        Ok(())
                    } else {
                        Err(StoreError::Transient("lock timeout".into()))
                    }
                }
            })
            .await
            .unwrap_err();

        match err {
            EnrichError::Persist {
                operation,
                chunk,
                attempts,
                source,
            } => {
                assert_eq!(operation, "stuck");
                assert_eq!(chunk, 1);
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let items = vec![1];
        let mut calls = 0;

        let err = executor(10, 5)
            .run("broken", &items, |_| {
                calls += 1;
                async { Err::<(), _>(StoreError::Permanent("syntax error".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EnrichError::Persist { attempts: 1, .. }));
        assert_eq!(calls, 1);
    }
}
