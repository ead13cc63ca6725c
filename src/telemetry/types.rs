//! Telemetry records handed to a [`TelemetrySink`](super::TelemetrySink).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::JobError;
use crate::http::{CallFailure, RemoteResponse, Timed};

/// Tag key carrying the run's correlation tag.
pub const OPERATION_ID_TAG: &str = "ai.operation.id";

/// One record for the sink, already tagged with the run's correlation tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryItem {
    pub time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub data: TelemetryData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryData {
    Event(EventData),
    Request(RequestData),
}

/// A discrete named event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, String>>,
}

/// A timed outbound request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestData {
    pub name: String,
    pub url: String,
    pub duration_ms: Option<u64>,
    pub result_code: Option<u16>,
    pub success: bool,
}

impl TelemetryItem {
    pub fn name(&self) -> &str {
        match &self.data {
            TelemetryData::Event(e) => &e.name,
            TelemetryData::Request(r) => &r.name,
        }
    }

    pub fn correlation_tag(&self) -> Option<&str> {
        self.tags.get(OPERATION_ID_TAG).map(String::as_str)
    }
}

/// What a finished call looked like, from either side of the `Result`.
///
/// Errors that never reached the wire have neither a duration nor a code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOutcome {
    pub duration_ms: Option<u64>,
    pub result_code: Option<u16>,
}

impl RequestOutcome {
    pub fn success(&self) -> bool {
        self.result_code == Some(200)
    }
}

impl From<&Timed<RemoteResponse>> for RequestOutcome {
    fn from(res: &Timed<RemoteResponse>) -> Self {
        Self {
            duration_ms: Some(res.duration_ms),
            result_code: Some(res.value.status),
        }
    }
}

impl From<&CallFailure> for RequestOutcome {
    fn from(err: &CallFailure) -> Self {
        Self {
            duration_ms: Some(err.duration_ms),
            result_code: err.value.status(),
        }
    }
}

impl From<&Result<Timed<RemoteResponse>, CallFailure>> for RequestOutcome {
    fn from(result: &Result<Timed<RemoteResponse>, CallFailure>) -> Self {
        match result {
            Ok(res) => res.into(),
            Err(err) => err.into(),
        }
    }
}

impl From<&JobError> for RequestOutcome {
    fn from(err: &JobError) -> Self {
        Self {
            duration_ms: err.duration_ms(),
            result_code: err.status(),
        }
    }
}
