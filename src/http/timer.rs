//! Call timing.
//!
//! [`CallTimer::time`] wraps a single outbound call and attaches the elapsed
//! time to whichever side of the `Result` comes back, so telemetry always
//! has a duration for a completed call. A call that never completes yields
//! no duration; bounding it is the job of the per-call timeout.

use std::fmt;
use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A value paired with the timing of the call that produced it.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub value: T,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl<T: fmt::Display> fmt::Display for Timed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {}ms)", self.value, self.duration_ms)
    }
}

impl<T: std::error::Error + 'static> std::error::Error for Timed<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.value)
    }
}

/// Stamps the start of a call and measures it on completion.
#[derive(Debug)]
pub struct CallTimer {
    started_at: DateTime<Utc>,
    start: Instant,
}

impl CallTimer {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish<T>(&self, value: T) -> Timed<T> {
        Timed {
            value,
            started_at: self.started_at,
            duration_ms: self.elapsed_ms(),
        }
    }

    /// Await `call`, timing it on both the success and the failure path.
    pub async fn time<F, T, E>(call: F) -> Result<Timed<T>, Timed<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let timer = Self::start();
        match call.await {
            Ok(value) => Ok(timer.finish(value)),
            Err(e) => Err(timer.finish(e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// What happened on one attempt. Logged, then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl AttemptRecord {
    pub fn from_result<T, E: fmt::Display>(attempt: u32, result: &Result<Timed<T>, Timed<E>>) -> Self {
        match result {
            Ok(ok) => Self {
                attempt,
                started_at: ok.started_at,
                outcome: AttemptOutcome::Success,
                error: None,
                duration_ms: ok.duration_ms,
            },
            Err(err) => Self {
                attempt,
                started_at: err.started_at,
                outcome: AttemptOutcome::Failure,
                error: Some(err.value.to_string()),
                duration_ms: err.duration_ms,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn duration_attached_to_success() {
        let result = CallTimer::time(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>("body")
        })
        .await;

        let timed = result.unwrap();
        assert_eq!(timed.value, "body");
        assert!(timed.duration_ms >= 20);
    }

    #[tokio::test]
    async fn duration_attached_to_failure() {
        let result = CallTimer::time(async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            Err::<(), _>("refused".to_string())
        })
        .await;

        let timed = result.unwrap_err();
        assert_eq!(timed.value, "refused");
        assert!(timed.duration_ms >= 15);
        assert_eq!(timed.to_string(), format!("refused (after {}ms)", timed.duration_ms));
    }

    #[test]
    fn started_at_precedes_finish() {
        let timer = CallTimer::start();
        let timed = timer.finish(());
        assert_eq!(timed.started_at, timer.started_at());
        assert!(timed.started_at <= Utc::now());
    }

    #[test]
    fn attempt_record_from_failure() {
        let result: Result<Timed<()>, Timed<String>> = Err(Timed {
            value: "status 503".into(),
            started_at: Utc::now(),
            duration_ms: 12,
        });
        let record = AttemptRecord::from_result(3, &result);
        assert_eq!(record.attempt, 3);
        assert!(!record.is_success());
        assert_eq!(record.error.as_deref(), Some("status 503"));
        assert_eq!(record.duration_ms, 12);
    }

    #[test]
    fn attempt_record_from_success_serializes_without_error() {
        let result: Result<Timed<u16>, Timed<String>> = Ok(Timed {
            value: 200,
            started_at: Utc::now(),
            duration_ms: 7,
        });
        let record = AttemptRecord::from_result(1, &result);
        assert!(record.is_success());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["duration_ms"], 7);
        assert!(json.get("error").is_none());
    }
}
