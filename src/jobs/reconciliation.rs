use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use tracing::{error, info};

use super::{log_start, now, reject, JobResult, TelemetrySettings, Trigger};
use crate::batch::{split, BatchRunner, BatchSummary};
use crate::config::ReconciliationConfig;
use crate::error::JobError;
use crate::http::RemoteClient;
use crate::retry::{RetryExecutor, Sleeper, TokioSleeper};
use crate::store::{DocumentQuery, RecordSource, WorkItem};
use crate::telemetry::{RequestOutcome, TelemetryReporter};

pub const PREFIX: &str = "[TIMER-JOBS][RECONCILIATION]";

/// Pushes completed and voided certificates to the continuity service.
///
/// Documents are read from `source`, split into batches and PUT one batch
/// at a time. A batch that exhausts its attempts fails the whole run.
pub struct ReconciliationJob<S> {
    config: ReconciliationConfig,
    telemetry: TelemetrySettings,
    source: S,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: RecordSource> ReconciliationJob<S> {
    pub fn new(config: ReconciliationConfig, telemetry: TelemetrySettings, source: S) -> Self {
        Self {
            config,
            telemetry,
            source,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub async fn run(
        &self,
        trigger: &Trigger,
        reporter: &mut TelemetryReporter,
    ) -> Result<JobResult, JobError> {
        log_start(PREFIX, trigger);
        self.telemetry.activate(reporter, trigger);
        let reporter = &*reporter;
        reporter.track_event(&format!("{PREFIX}[STARTED]"), None);

        self.config
            .validate()
            .map_err(|e| reject(PREFIX, reporter, e))?;
        info!(at = %now(), "{PREFIX}[CONFIG]{}", self.config.summary());

        let outcome = self.reconcile(reporter).await;
        self.source.close().await;
        info!(at = %now(), "{PREFIX}[SOURCE-CLOSED][{}]", self.source.name());

        match outcome {
            Ok(summary) => {
                info!(
                    at = %now(),
                    batches = summary.batches,
                    items = summary.items,
                    attempts = summary.attempts,
                    "{PREFIX}[SUCCESS]"
                );
                reporter.track_event(&format!("{PREFIX}[SUCCEEDED]"), None);
                Ok(JobResult::Succeeded)
            }
            Err(e) => {
                error!(at = %now(), error = %e, "{PREFIX}[FAILED]");
                reporter.track_request(
                    &self.request_name(),
                    &self.config.url,
                    RequestOutcome::from(&e),
                );
                reporter.track_event(&format!("{PREFIX}[FAILED]"), None);
                Ok(JobResult::Failed {
                    kind: e.kind(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn reconcile(&self, reporter: &TelemetryReporter) -> Result<BatchSummary, JobError> {
        let step = |tag: String| {
            info!(at = %now(), "{tag}");
            reporter.track_event(&tag, None);
        };

        step(format!("{PREFIX}[SOURCE][{}]", self.source.name()));

        let query = DocumentQuery::for_dates(self.config.start_date, self.config.end_date)?;
        step(format!(
            "{PREFIX}[DOCUMENT-QUERY][{}]",
            serde_json::to_string(&query)?
        ));

        let now = Utc::now();
        let items: Vec<WorkItem> = self
            .source
            .fetch(&query)
            .await?
            .into_iter()
            .map(|record| WorkItem::from_record(record, now))
            .collect();
        step(format!("{PREFIX}[DOCUMENT-COUNT][{}]", items.len()));

        let batches = split(&items, self.config.batch_size)?;
        step(format!("{PREFIX}[BATCH-SIZE][{}]", self.config.batch_size));

        let client = RemoteClient::builder(
            self.config.url.clone(),
            Duration::from_millis(self.config.timeout_ms),
        )
        .api_key(self.config.api_key.clone())
        .build()
        .map_err(|e| JobError::Config(e.to_string()))?;

        let executor = RetryExecutor::with_sleeper(self.config.retry_policy(), self.sleeper.clone());
        let request_name = self.request_name();
        let target = client.url(&self.config.api_name);
        let runner = BatchRunner::new(&executor, reporter, PREFIX, &request_name, &target);

        let api_name = self.config.api_name.as_str();
        runner
            .run(&batches, |batch, _| {
                client.send(Method::PUT, api_name, Some(batch.items))
            })
            .await
    }

    fn request_name(&self) -> String {
        format!("PUT {}", self.config.api_name)
    }
}
