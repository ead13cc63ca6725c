//! Batching of work items and sequential delivery of the batches.

use std::future::Future;

use chrono::Utc;
use tracing::{error, info};

use crate::error::JobError;
use crate::http::{AttemptRecord, CallFailure, RemoteResponse, Timed};
use crate::retry::RetryExecutor;
use crate::telemetry::{RequestOutcome, TelemetryReporter};

/// An order-preserving slice of the input. `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a, T> {
    pub index: usize,
    pub items: &'a [T],
}

impl<T> Batch<'_, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cut `items` into consecutive batches of `batch_size`; the last may be
/// shorter. A zero size is a configuration error.
pub fn split<T>(items: &[T], batch_size: usize) -> Result<Vec<Batch<'_, T>>, JobError> {
    if batch_size == 0 {
        return Err(JobError::Config("batch size must be at least 1".into()));
    }
    Ok(items
        .chunks(batch_size)
        .enumerate()
        .map(|(i, items)| Batch {
            index: i + 1,
            items,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batches: usize,
    pub items: usize,
    pub attempts: u32,
}

/// Sends batches one after another, each under its own retry sequence.
pub struct BatchRunner<'r> {
    executor: &'r RetryExecutor,
    reporter: &'r TelemetryReporter,
    log_prefix: &'r str,
    request_name: &'r str,
    target: &'r str,
}

impl<'r> BatchRunner<'r> {
    pub fn new(
        executor: &'r RetryExecutor,
        reporter: &'r TelemetryReporter,
        log_prefix: &'r str,
        request_name: &'r str,
        target: &'r str,
    ) -> Self {
        Self {
            executor,
            reporter,
            log_prefix,
            request_name,
            target,
        }
    }

    /// Deliver every batch in order.
    ///
    /// The first batch that exhausts its retries aborts the run; later
    /// batches are never sent. Every attempt is logged and tracked as a
    /// request record before the next attempt or batch starts.
    pub async fn run<'b, 'a, T, F, Fut>(
        &self,
        batches: &'b [Batch<'a, T>],
        mut send: F,
    ) -> Result<BatchSummary, JobError>
    where
        F: FnMut(&'b Batch<'a, T>, u32) -> Fut,
        Fut: Future<Output = Result<Timed<RemoteResponse>, CallFailure>>,
    {
        let total = batches.len();
        let mut summary = BatchSummary::default();

        for batch in batches {
            let prefix = self.log_prefix;
            let mut attempts = 0;
            let result = self
                .executor
                .execute(|attempt| {
                    attempts = attempt;
                    info!(
                        at = %Utc::now().to_rfc3339(),
                        size = batch.len(),
                        "{prefix}[MAKE-API-CALL][{}][BATCH {}/{total}][ATTEMPT-{attempt}]",
                        self.target,
                        batch.index
                    );
                    let call = send(batch, attempt);
                    async move {
                        let result = call.await;
                        self.record_attempt(attempt, batch.index, total, &result);
                        result
                    }
                })
                .await;
            summary.attempts += attempts;

            match result {
                Ok(response) => {
                    info!(
                        status = response.value.status,
                        duration_ms = response.duration_ms,
                        "{prefix}[BATCH-SENT][{}/{total}]",
                        batch.index
                    );
                    summary.batches += 1;
                    summary.items += batch.len();
                }
                Err(source) => {
                    return Err(JobError::BatchFailed {
                        batch: batch.index,
                        total,
                        source,
                    });
                }
            }
        }

        Ok(summary)
    }

    fn record_attempt(
        &self,
        attempt: u32,
        batch: usize,
        total: usize,
        result: &Result<Timed<RemoteResponse>, CallFailure>,
    ) {
        let record = AttemptRecord::from_result(attempt, result);
        if let Some(err) = &record.error {
            error!(
                at = %Utc::now().to_rfc3339(),
                duration_ms = record.duration_ms,
                error = %err,
                "{}[ERROR][BATCH {batch}/{total}][ATTEMPT-{attempt}]",
                self.log_prefix
            );
        }
        self.reporter
            .track_request(self.request_name, self.target, RequestOutcome::from(result));
    }
}
