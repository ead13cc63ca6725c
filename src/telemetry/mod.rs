//! Run-scoped telemetry.
//!
//! A [`TelemetryReporter`] is created inactive and passed by reference to
//! every call site of a run. Until [`init`](TelemetryReporter::init) is
//! called, tracking calls are accepted and do nothing. Sink failures are
//! logged and never reach the caller.

mod sink;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

pub use sink::{to_envelope, HttpSink, TelemetryError, TelemetrySink};
pub use types::{
    EventData, RequestData, RequestOutcome, TelemetryData, TelemetryItem, OPERATION_ID_TAG,
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

struct Active {
    correlation_tag: String,
    sink: Arc<dyn TelemetrySink>,
}

#[derive(Default)]
pub struct TelemetryReporter {
    active: Option<Active>,
}

impl std::fmt::Debug for TelemetryReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryReporter")
            .field("active", &self.is_active())
            .field("correlation_tag", &self.correlation_tag())
            .finish()
    }
}

impl TelemetryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn correlation_tag(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.correlation_tag.as_str())
    }

    /// Activate with an ingestion sink keyed by `instrumentation_key`.
    /// A second call within the same run is ignored.
    pub fn init(&mut self, instrumentation_key: &str, correlation_id: &str, endpoint: &str) {
        if self.is_active() {
            return;
        }
        let sink = HttpSink::spawn(endpoint, instrumentation_key);
        self.init_with_sink(Arc::new(sink), correlation_id);
    }

    /// Activate with an explicit sink. A second call is ignored.
    pub fn init_with_sink(&mut self, sink: Arc<dyn TelemetrySink>, correlation_id: &str) {
        if self.is_active() {
            return;
        }
        self.active = Some(Active {
            correlation_tag: correlation_id.to_string(),
            sink,
        });
        info!(
            correlation_tag = correlation_id,
            "[TIMER-JOBS][TELEMETRY][INITIALISED]"
        );
    }

    pub fn track_event(&self, name: &str, properties: Option<BTreeMap<String, String>>) {
        let Some(active) = &self.active else {
            return;
        };
        let data = TelemetryData::Event(EventData {
            name: name.to_string(),
            properties,
        });
        self.emit(active, data, "EVENT-TRACKED");
    }

    pub fn track_request(&self, name: &str, target: &str, outcome: RequestOutcome) {
        let Some(active) = &self.active else {
            return;
        };
        let data = TelemetryData::Request(RequestData {
            name: name.to_string(),
            url: target.to_string(),
            duration_ms: outcome.duration_ms,
            result_code: outcome.result_code,
            success: outcome.success(),
        });
        self.emit(active, data, "REQUEST-TRACKED");
    }

    fn emit(&self, active: &Active, data: TelemetryData, label: &str) {
        let item = TelemetryItem {
            time: Utc::now(),
            tags: BTreeMap::from([(
                OPERATION_ID_TAG.to_string(),
                active.correlation_tag.clone(),
            )]),
            data,
        };
        let rendered = serde_json::to_string(&item).unwrap_or_default();
        match active.sink.send(item) {
            Ok(()) => info!("[TIMER-JOBS][TELEMETRY][{label}: {rendered}]"),
            Err(e) => warn!(error = %e, "[TIMER-JOBS][TELEMETRY][DROPPED: {rendered}]"),
        }
    }

    /// Drain the sink's backlog, waiting at most a few seconds.
    pub async fn flush(&self) {
        let Some(handle) = self.active.as_ref().and_then(|a| a.sink.shutdown()) else {
            return;
        };
        match tokio::time::timeout(FLUSH_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "telemetry worker ended abnormally"),
            Err(_) => warn!("telemetry flush timed out; pending items dropped"),
        }
    }
}

/// Keeps every item it is given.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    items: std::sync::Mutex<Vec<TelemetryItem>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn items(&self) -> Vec<TelemetryItem> {
        self.items.lock().unwrap().clone()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.items().iter().map(|i| i.name().to_string()).collect()
    }

    pub(crate) fn requests(&self) -> Vec<RequestData> {
        self.items()
            .into_iter()
            .filter_map(|i| match i.data {
                TelemetryData::Request(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl TelemetrySink for RecordingSink {
    fn send(&self, item: TelemetryItem) -> Result<(), TelemetryError> {
        self.items.lock().unwrap().push(item);
        Ok(())
    }
}
