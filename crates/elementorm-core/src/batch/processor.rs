//! Runs many async operations in chunks with a concurrency limit.
//!
//! Operations inside a chunk run as tokio tasks gated by a semaphore. After
//! each chunk the running failure ratio is checked; once it exceeds the
//! configured threshold the batch stops and the error carries the report
//! gathered so far, results included.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::config::BatchConfig;

/// One failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Position of the operation in the input.
    pub index: usize,
    pub message: String,
}

/// Outcome of a batch that ran to completion.
#[derive(Debug, Clone)]
pub struct BatchReport<R> {
    /// Successful results with their input positions, in input order.
    pub successful: Vec<(usize, R)>,
    /// Failures, in input order.
    pub failed: Vec<BatchFailure>,
    /// Number of chunks processed.
    pub chunks: usize,
}

impl<R> BatchReport<R> {
    pub fn processed(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    /// Fraction of processed operations that failed.
    pub fn failure_ratio(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.failed.len() as f64 / n as f64,
        }
    }

    /// Results without their positions.
    pub fn into_results(self) -> Vec<R> {
        self.successful.into_iter().map(|(_, r)| r).collect()
    }
}

/// Errors raised by the batch processor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchOperationError {
    /// Too many operations failed; the remaining chunks were skipped.
    #[error("batch aborted: failure ratio {ratio:.2} exceeds threshold {threshold:.2} ({failed} failed, {succeeded} succeeded)")]
    ThresholdExceeded {
        ratio: f64,
        threshold: f64,
        succeeded: usize,
        failed: usize,
    },
}

/// A batch that stopped early, with everything it completed before stopping.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct BatchAborted<R> {
    pub error: BatchOperationError,
    /// Results and failures of the chunks that ran.
    pub report: BatchReport<R>,
}

impl<R> BatchAborted<R> {
    /// Split into the error and the partial report.
    pub fn into_parts(self) -> (BatchOperationError, BatchReport<R>) {
        (self.error, self.report)
    }
}

impl<R> From<BatchAborted<R>> for crate::error::Error {
    fn from(aborted: BatchAborted<R>) -> Self {
        crate::error::Error::Batch(aborted.error)
    }
}

/// Processes operations in fixed-size chunks under a concurrency limit.
#[derive(Debug, Clone)]
pub struct AsyncBatchProcessor {
    config: BatchConfig,
    semaphore: Arc<Semaphore>,
}

impl AsyncBatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `operation` over every item.
    ///
    /// Returns the report when the batch completes, or [`BatchAborted`]
    /// holding [`BatchOperationError::ThresholdExceeded`] and the partial
    /// report when the failure ratio after a chunk exceeds the configured
    /// threshold. A panicking operation counts as a failure.
    #[instrument(skip_all, fields(items = items.len(), batch_size = self.config.batch_size))]
    pub async fn process<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        operation: F,
    ) -> Result<BatchReport<R>, BatchAborted<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let operation = Arc::new(operation);
        let batch_size = self.config.batch_size.max(1);
        let mut report = BatchReport {
            successful: Vec::new(),
            failed: Vec::new(),
            chunks: 0,
        };

        let mut items = items.into_iter().enumerate().peekable();
        while items.peek().is_some() {
            let chunk: Vec<(usize, T)> = items.by_ref().take(batch_size).collect();
            let indices: Vec<usize> = chunk.iter().map(|(i, _)| *i).collect();

            let tasks = chunk.into_iter().map(|(index, item)| {
                let semaphore = Arc::clone(&self.semaphore);
                let operation = Arc::clone(&operation);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    (index, operation(item).await.map_err(|e| e.to_string()))
                })
            });

            for (joined, index) in join_all(tasks).await.into_iter().zip(indices) {
                match joined {
                    Ok((index, Ok(result))) => report.successful.push((index, result)),
                    Ok((index, Err(message))) => report.failed.push(BatchFailure { index, message }),
                    Err(e) => report.failed.push(BatchFailure {
                        index,
                        message: format!("operation panicked: {}", e),
                    }),
                }
            }
            report.chunks += 1;

            let ratio = report.failure_ratio();
            debug!(
                chunk = report.chunks,
                processed = report.processed(),
                failed = report.failed.len(),
                "batch chunk done"
            );
            if ratio > self.config.error_threshold {
                warn!(ratio, threshold = self.config.error_threshold, "batch failure threshold exceeded");
                return Err(BatchAborted {
                    error: BatchOperationError::ThresholdExceeded {
                        ratio,
                        threshold: self.config.error_threshold,
                        succeeded: report.successful.len(),
                        failed: report.failed.len(),
                    },
                    report,
                });
            }
        }

        info!(
            succeeded = report.successful.len(),
            failed = report.failed.len(),
            chunks = report.chunks,
            "batch complete"
        );
        Ok(report)
    }
}

impl Default for AsyncBatchProcessor {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn processor(concurrency: usize, batch_size: usize, threshold: f64) -> AsyncBatchProcessor {
        AsyncBatchProcessor::new(
            BatchConfig::default()
                .with_max_concurrency(concurrency)
                .with_batch_size(batch_size)
                .with_error_threshold(threshold),
        )
    }

    #[tokio::test]
    async fn test_all_succeed_in_order() {
        let report = processor(4, 3, 0.1)
            .process((0..10).collect(), |n: i32| async move { Ok::<_, String>(n * 2) })
            .await
            .unwrap();
        assert_eq!(report.chunks, 4);
        assert_eq!(
            report.into_results(),
            (0..10).map(|n| n * 2).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));

        processor(2, 10, 0.0)
            .process((0..10).collect(), move |_: i32| {
                let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            })
            .await
            .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_threshold_abort_keeps_partial_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = processor(4, 4, 0.2)
            .process((0..12).collect(), move |n: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        Err(format!("bad {}", n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        let (error, report) = match result {
            Err(aborted) => aborted.into_parts(),
            Ok(report) => panic!("expected threshold error, got {} chunks", report.chunks),
        };
        match error {
            BatchOperationError::ThresholdExceeded {
                ratio,
                succeeded,
                failed,
                ..
            } => {
                assert!((ratio - 0.5).abs() < f64::EPSILON);
                assert_eq!((succeeded, failed), (2, 2));
            }
        }
        assert_eq!(report.chunks, 1);
        assert_eq!(report.successful, vec![(1, 1), (3, 3)]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].message, "bad 0");
        assert_eq!(report.into_results(), vec![1, 3]);
        // Later chunks never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_abort_converts_to_crate_error() {
        let result = processor(2, 2, 0.0)
            .process(vec![1, 2], |n: i32| async move { Err::<i32, _>(format!("bad {}", n)) })
            .await;
        let error: crate::error::Error = result.unwrap_err().into();
        assert!(matches!(
            error,
            crate::error::Error::Batch(BatchOperationError::ThresholdExceeded { failed: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = AsyncBatchProcessor::default()
            .process(Vec::<i32>::new(), |n| async move { Ok::<_, String>(n) })
            .await
            .unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.failure_ratio(), 0.0);
    }
}
