//! Timer-triggered jobs.
//!
//! A job run is one call to a job's `run`: it resolves its configuration,
//! optionally activates telemetry, drives its remote calls through a
//! [`RetryExecutor`](crate::retry::RetryExecutor) and reports exactly one
//! terminal outcome. Exhausted retries are a [`JobResult::Failed`], not an
//! `Err`; only configuration errors escape as `Err`, before any attempt.

mod landings;
mod reconciliation;

pub use landings::LandingsJob;
pub use reconciliation::ReconciliationJob;

use chrono::Utc;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{FailureKind, JobError};
use crate::telemetry::TelemetryReporter;

/// What the host scheduler tells a run about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub is_past_due: bool,
    pub invocation_id: String,
}

impl Trigger {
    pub fn new(is_past_due: bool, invocation_id: Option<String>) -> Self {
        Self {
            is_past_due,
            invocation_id: invocation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        }
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Succeeded,
    Failed { kind: FailureKind, reason: String },
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Succeeded)
    }
}

/// Telemetry activation settings shared by both jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub instrumentation_key: Option<String>,
    pub endpoint: String,
}

impl TelemetrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            instrumentation_key: config.instrumentation_key.clone(),
            endpoint: config.telemetry_endpoint.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            instrumentation_key: None,
            endpoint: String::new(),
        }
    }

    /// Activate `reporter` when a key is configured. No-op otherwise, or if
    /// the reporter is already active.
    fn activate(&self, reporter: &mut TelemetryReporter, trigger: &Trigger) {
        if let Some(key) = &self.instrumentation_key {
            reporter.init(key, &trigger.invocation_id, &self.endpoint);
        }
    }
}

/// Shared opening lines: STARTED, RUNNING-LATE when past due.
fn log_start(prefix: &str, trigger: &Trigger) {
    info!(at = %now(), invocation_id = %trigger.invocation_id, "{prefix}[STARTED]");
    if trigger.is_past_due {
        info!(at = %now(), "{prefix}[RUNNING-LATE]");
    }
}

/// Terminal lines for a run rejected before its first attempt: the error is
/// logged and the FAILED event is tracked, then `e` is handed back.
fn reject(prefix: &str, reporter: &TelemetryReporter, e: JobError) -> JobError {
    error!(at = %now(), error = %e, "{prefix}[ERROR][CONFIG]");
    reporter.track_event(&format!("{prefix}[FAILED]"), None);
    e
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Collects formatted log output for the current thread.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct LogCapture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl LogCapture {
    /// Route this thread's events into the buffer until the guard drops.
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Number of lifecycle lines containing `needle`. Telemetry emission
    /// lines echo event names and are skipped.
    pub(crate) fn count(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|l| !l.contains("[TIMER-JOBS][TELEMETRY]") && l.contains(needle))
            .count()
    }
}

#[cfg(test)]
impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_generates_invocation_id() {
        let a = Trigger::new(false, None);
        let b = Trigger::new(true, None);
        assert_ne!(a.invocation_id, b.invocation_id);
        assert_eq!(
            Trigger::new(false, Some("inv-7".into())).invocation_id,
            "inv-7"
        );
    }

    #[test]
    fn telemetry_settings_from_config() {
        let mut config = Config::default();
        config.instrumentation_key = Some("ikey".into());
        let settings = TelemetrySettings::from_config(&config);
        assert_eq!(settings.instrumentation_key.as_deref(), Some("ikey"));
        assert_eq!(settings.endpoint, config.telemetry_endpoint);
    }

    #[test]
    fn disabled_settings_leave_reporter_inactive() {
        let mut reporter = TelemetryReporter::new();
        TelemetrySettings::disabled().activate(&mut reporter, &Trigger::new(false, None));
        assert!(!reporter.is_active());
    }

    #[test]
    fn reject_tracks_failed_and_logs_error() {
        let sink = std::sync::Arc::new(crate::telemetry::RecordingSink::default());
        let mut reporter = TelemetryReporter::new();
        reporter.init_with_sink(sink.clone(), "inv-c");
        let logs = LogCapture::default();
        let _guard = logs.install();

        let e = reject("[T]", &reporter, JobError::Config("bad url".into()));
        assert!(matches!(e, JobError::Config(_)));
        assert_eq!(sink.names(), vec!["[T][FAILED]"]);
        assert_eq!(logs.count("[T][ERROR][CONFIG]"), 1);
    }

    #[test]
    fn start_logs_running_late_only_when_past_due() {
        let logs = LogCapture::default();
        let _guard = logs.install();

        log_start("[T]", &Trigger::new(false, None));
        assert_eq!(logs.count("[T][STARTED]"), 1);
        assert_eq!(logs.count("[T][RUNNING-LATE]"), 0);

        log_start("[T]", &Trigger::new(true, None));
        assert_eq!(logs.count("[T][STARTED]"), 2);
        assert_eq!(logs.count("[T][RUNNING-LATE]"), 1);
    }

    #[test]
    fn job_result_success_flag() {
        assert!(JobResult::Succeeded.is_success());
        assert!(!JobResult::Failed {
            kind: FailureKind::BudgetExhausted,
            reason: "down".into()
        }
        .is_success());
    }
}
