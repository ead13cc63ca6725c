use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Url};
use tracing::{error, info};

use super::{log_start, now, reject, JobResult, TelemetrySettings, Trigger};
use crate::config::LandingsConfig;
use crate::error::JobError;
use crate::http::{load_ca_bundle, CallFailure, RemoteClient, RemoteResponse, Timed};
use crate::retry::{RetryExecutor, Sleeper, TokioSleeper};
use crate::telemetry::{RequestOutcome, TelemetryReporter};

pub const PREFIX: &str = "[TIMER-JOBS][LANDINGS]";

/// Asks the data reader to start its landings and reporting run.
///
/// A single bodiless POST, retried `retries` times after the first attempt
/// with stepped-linear backoff.
pub struct LandingsJob {
    config: LandingsConfig,
    telemetry: TelemetrySettings,
    sleeper: Arc<dyn Sleeper>,
}

impl LandingsJob {
    pub fn new(config: LandingsConfig, telemetry: TelemetrySettings) -> Self {
        Self {
            config,
            telemetry,
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

        let client = self
            .config
            .validate()
            .and_then(|()| self.build_client())
            .map_err(|e| reject(PREFIX, reporter, e))?;

        info!(
            at = %now(),
            "{PREFIX}[CONFIG]{}",
            self.config.summary(self.telemetry.instrumentation_key.as_deref())
        );

        let request_name = format!("POST {}", request_path(&self.config.url));
        let executor = RetryExecutor::with_sleeper(self.config.retry_policy(), self.sleeper.clone());
        let result = executor
            .execute(|attempt| self.attempt(&client, reporter, &request_name, attempt))
            .await;

        match result {
            Ok(_) => {
                reporter.track_event(&format!("{PREFIX}[SUCCEEDED]"), None);
                info!(at = %now(), "{PREFIX}[SUCCESS]");
                Ok(JobResult::Succeeded)
            }
            Err(e) => {
                reporter.track_event(&format!("{PREFIX}[FAILED]"), None);
                error!(at = %now(), error = %e, "{PREFIX}[ERROR][TERMINATING-RETRIES]");
                let e = JobError::from(e);
                Ok(JobResult::Failed {
                    kind: e.kind(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn attempt(
        &self,
        client: &RemoteClient,
        reporter: &TelemetryReporter,
        request_name: &str,
        attempt: u32,
    ) -> Result<Timed<RemoteResponse>, CallFailure> {
        info!(at = %now(), "{PREFIX}[MAKING-HTTP-CALL][ATTEMPT-{attempt}]");
        let result = client.send::<()>(Method::POST, "", None).await;
        if let Err(e) = &result {
            error!(at = %now(), error = %e, "{PREFIX}[ERROR][ATTEMPT-{attempt}]");
        }
        reporter.track_request(request_name, &self.config.url, RequestOutcome::from(&result));
        result
    }

    /// The CA bundle is optional: a bundle that cannot be loaded is logged
    /// and the client falls back to the default roots.
    fn build_client(&self) -> Result<RemoteClient, JobError> {
        let mut builder = RemoteClient::builder(
            self.config.url.clone(),
            Duration::from_millis(self.config.timeout_ms),
        );
        if let Some(path) = &self.config.ca_bundle {
            match load_ca_bundle(path) {
                Ok(roots) => builder = builder.extra_roots(roots),
                Err(e) => error!(
                    at = %now(),
                    error = %e,
                    "{PREFIX}[ERROR][CA-BUNDLE][continuing with default roots]"
                ),
            }
        }
        builder.build().map_err(|e| JobError::Config(e.to_string()))
    }
}

fn request_path(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::jobs::LogCapture;
    use crate::retry::RecordingSleeper;
    use crate::telemetry::RecordingSink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(server: &MockServer, sleeper: Arc<RecordingSleeper>) -> LandingsJob {
        let config = LandingsConfig {
            url: format!("{}/v1/jobs/landings", server.uri()),
            timeout_ms: 2_000,
            retries: 4,
            retry_delay_ms: 300_000,
            ca_bundle: None,
        };
        LandingsJob::new(config, TelemetrySettings::disabled()).with_sleeper(sleeper)
    }

    fn reporter(sink: Arc<RecordingSink>) -> TelemetryReporter {
        let mut reporter = TelemetryReporter::new();
        reporter.init_with_sink(sink, "inv-1");
        reporter
    }

    fn count(names: &[String], suffix: &str) -> usize {
        names.iter().filter(|n| n.ends_with(suffix)).count()
    }

    #[tokio::test]
    async fn first_call_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs/landings"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sink = Arc::new(RecordingSink::default());
        let mut reporter = reporter(sink.clone());
        let logs = LogCapture::default();
        let _guard = logs.install();
        let result = job(&server, sleeper.clone())
            .run(&Trigger::new(false, None), &mut reporter)
            .await
            .unwrap();

        assert_eq!(result, JobResult::Succeeded);
        assert!(sleeper.delays().is_empty());
        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].name, "POST /v1/jobs/landings");
        assert!(requests[0].success);

        assert_eq!(logs.count("[RUNNING-LATE]"), 0);
        assert_eq!(logs.count("[LANDINGS][CONFIG]"), 1);
        assert_eq!(logs.count("[MAKING-HTTP-CALL][ATTEMPT-1]"), 1);
        assert_eq!(logs.count("[LANDINGS][SUCCESS]"), 1);
        assert_eq!(logs.count("[LANDINGS][ERROR]"), 0);
    }

    #[tokio::test]
    async fn four_failures_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(4)
            .expect(4)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sink = Arc::new(RecordingSink::default());
        let mut reporter = reporter(sink.clone());
        let logs = LogCapture::default();
        let _guard = logs.install();
        let result = job(&server, sleeper.clone())
            .run(&Trigger::new(false, None), &mut reporter)
            .await
            .unwrap();

        assert_eq!(result, JobResult::Succeeded);
        for attempt in 1..=5 {
            let line = format!("[MAKING-HTTP-CALL][ATTEMPT-{attempt}]");
            assert_eq!(logs.count(&line), 1, "{line}");
        }
        assert_eq!(logs.count("[LANDINGS][ERROR][ATTEMPT-"), 4);
        assert_eq!(logs.count("[LANDINGS][SUCCESS]"), 1);
        assert_eq!(logs.count("[ERROR][TERMINATING-RETRIES]"), 0);
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::ZERO,
                Duration::from_millis(300_000),
                Duration::from_millis(600_000),
                Duration::from_millis(900_000),
            ]
        );
        let names = sink.names();
        assert_eq!(count(&names, "[SUCCEEDED]"), 1);
        assert_eq!(count(&names, "[FAILED]"), 0);
        let codes: Vec<Option<u16>> = sink.requests().iter().map(|r| r.result_code).collect();
        assert_eq!(
            codes,
            vec![Some(500), Some(500), Some(500), Some(500), Some(200)]
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(5)
            .mount(&server)
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let sink = Arc::new(RecordingSink::default());
        let mut reporter = reporter(sink.clone());
        let logs = LogCapture::default();
        let _guard = logs.install();
        let result = job(&server, sleeper.clone())
            .run(&Trigger::new(true, None), &mut reporter)
            .await
            .unwrap();

        assert_eq!(logs.count("[LANDINGS][RUNNING-LATE]"), 1);
        assert_eq!(logs.count("[MAKING-HTTP-CALL][ATTEMPT-"), 5);
        assert_eq!(logs.count("[LANDINGS][ERROR][ATTEMPT-"), 5);
        assert_eq!(logs.count("[LANDINGS][ERROR][TERMINATING-RETRIES]"), 1);
        assert_eq!(logs.count("[LANDINGS][SUCCESS]"), 0);

        match result {
            JobResult::Failed { kind, reason } => {
                assert_eq!(kind, FailureKind::BudgetExhausted);
                assert!(reason.contains("5 attempt(s)"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(sleeper.delays().len(), 4);
        let names = sink.names();
        assert_eq!(count(&names, "[FAILED]"), 1);
        assert_eq!(count(&names, "[SUCCEEDED]"), 0);
        assert_eq!(sink.requests().len(), 5);
        assert!(sink.requests().iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn inactive_telemetry_still_runs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut reporter = TelemetryReporter::new();
        let result = job(&server, Arc::new(RecordingSleeper::default()))
            .run(&Trigger::new(false, None), &mut reporter)
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(!reporter.is_active());
    }

    #[tokio::test]
    async fn invalid_url_fails_before_any_attempt() {
        let config = LandingsConfig {
            url: "reader.local/landings".into(),
            ..Default::default()
        };
        let sleeper = Arc::new(RecordingSleeper::default());
        let sink = Arc::new(RecordingSink::default());
        let mut reporter = reporter(sink.clone());
        let logs = LogCapture::default();
        let _guard = logs.install();
        let job = LandingsJob::new(config, TelemetrySettings::disabled()).with_sleeper(sleeper.clone());
        let err = job
            .run(&Trigger::new(false, None), &mut reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Config(_)));
        assert!(sleeper.delays().is_empty());
        assert!(sink.requests().is_empty());

        let names = sink.names();
        assert_eq!(count(&names, "[STARTED]"), 1);
        assert_eq!(count(&names, "[FAILED]"), 1);
        assert_eq!(logs.count("[LANDINGS][ERROR][CONFIG]"), 1);
        assert_eq!(logs.count("[MAKING-HTTP-CALL]"), 0);
    }

    #[tokio::test]
    async fn unreadable_ca_bundle_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = job(&server, Arc::new(RecordingSleeper::default()));
        job.config.ca_bundle = Some("/nonexistent/cabundle.pem".into());
        let result = job
            .run(&Trigger::new(false, None), &mut TelemetryReporter::new())
            .await
            .unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn request_path_from_url() {
        assert_eq!(
            request_path("http://localhost:9000/v1/jobs/landings"),
            "/v1/jobs/landings"
        );
        assert_eq!(request_path("not a url"), "not a url");
    }
}
