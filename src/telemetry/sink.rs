use std::sync::Mutex;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{TelemetryData, TelemetryItem};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry sink is closed")]
    Closed,

    #[error("telemetry sink rejected item: {0}")]
    Rejected(String),
}

/// Destination for telemetry items. `send` must not block.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, item: TelemetryItem) -> Result<(), TelemetryError>;

    /// Stop accepting items and hand back the task draining the backlog,
    /// if the sink has one.
    fn shutdown(&self) -> Option<JoinHandle<()>> {
        None
    }
}

/// Posts items to an ingestion endpoint in the Application Insights
/// envelope format.
///
/// `send` only enqueues; a background task does the HTTP work and logs
/// delivery failures.
pub struct HttpSink {
    sender: Mutex<Option<UnboundedSender<TelemetryItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HttpSink {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(endpoint: impl Into<String>, instrumentation_key: impl Into<String>) -> Self {
        let (tx, rx) = unbounded_channel();
        let worker = tokio::spawn(deliver(
            Client::new(),
            endpoint.into(),
            instrumentation_key.into(),
            rx,
        ));
        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl TelemetrySink for HttpSink {
    fn send(&self, item: TelemetryItem) -> Result<(), TelemetryError> {
        let guard = self.sender.lock().map_err(|_| TelemetryError::Closed)?;
        match guard.as_ref() {
            Some(tx) => tx.send(item).map_err(|_| TelemetryError::Closed),
            None => Err(TelemetryError::Closed),
        }
    }

    fn shutdown(&self) -> Option<JoinHandle<()>> {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        self.worker.lock().ok().and_then(|mut w| w.take())
    }
}

async fn deliver(
    client: Client,
    endpoint: String,
    instrumentation_key: String,
    mut rx: UnboundedReceiver<TelemetryItem>,
) {
    while let Some(item) = rx.recv().await {
        let envelope = to_envelope(&item, &instrumentation_key);
        let result = client
            .post(&endpoint)
            .timeout(Duration::from_secs(10))
            .json(&[envelope])
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => debug!(name = item.name(), "telemetry item delivered"),
            Err(e) => warn!(name = item.name(), error = %e, "telemetry delivery failed"),
        }
    }
}

/// Render an item as an ingestion envelope.
pub fn to_envelope(item: &TelemetryItem, instrumentation_key: &str) -> Value {
    let time = item.time.to_rfc3339();
    match &item.data {
        TelemetryData::Event(event) => json!({
            "name": "Microsoft.ApplicationInsights.Event",
            "time": time,
            "iKey": instrumentation_key,
            "tags": item.tags,
            "data": {
                "baseType": "EventData",
                "baseData": {
                    "ver": 2,
                    "name": event.name,
                    "properties": event.properties.clone().unwrap_or_default(),
                }
            }
        }),
        TelemetryData::Request(req) => json!({
            "name": "Microsoft.ApplicationInsights.Request",
            "time": time,
            "iKey": instrumentation_key,
            "tags": item.tags,
            "data": {
                "baseType": "RequestData",
                "baseData": {
                    "ver": 2,
                    "id": uuid::Uuid::new_v4().to_string(),
                    "name": req.name,
                    "url": req.url,
                    "duration": format_duration(req.duration_ms.unwrap_or(0)),
                    "responseCode": req.result_code.map(|c| c.to_string()).unwrap_or_default(),
                    "success": req.success,
                }
            }
        }),
    }
}

/// `[d.]hh:mm:ss.fff`
fn format_duration(ms: u64) -> String {
    let days = ms / 86_400_000;
    let hours = (ms / 3_600_000) % 24;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    if days > 0 {
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}
