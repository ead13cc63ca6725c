//! Work-item source for the reconciliation job.
//!
//! [`RecordSource`] is the seam to the document store. [`JsonFileSource`]
//! reads an exported JSON array of documents, which is what the binary uses.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read records from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed records in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid query: {0}")]
    Query(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Complete,
    Void,
    #[serde(other)]
    Other,
}

/// A document as stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub document_number: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// Payload entry sent to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub cert_number: String,
    pub status: DocumentStatus,
    pub timestamp: DateTime<Utc>,
}

impl WorkItem {
    /// Complete documents keep their creation time; voided ones are stamped
    /// with `now`.
    pub fn from_record(record: SourceRecord, now: DateTime<Utc>) -> Self {
        let timestamp = match record.status {
            DocumentStatus::Complete => record.created_at,
            _ => now,
        };
        Self {
            cert_number: record.document_number,
            status: record.status,
            timestamp,
        }
    }
}

/// Documents created between `start` and the day after `end`, inclusive,
/// with one of `statuses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentQuery {
    pub created_from: DateTime<Utc>,
    pub created_to: DateTime<Utc>,
    pub statuses: Vec<DocumentStatus>,
}

impl DocumentQuery {
    pub fn for_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, StoreError> {
        if start > end {
            return Err(StoreError::Query(format!(
                "start date {start} is after end date {end}"
            )));
        }
        let next = end
            .checked_add_days(Days::new(1))
            .ok_or_else(|| StoreError::Query(format!("end date {end} out of range")))?;
        Ok(Self {
            created_from: start.and_time(chrono::NaiveTime::MIN).and_utc(),
            created_to: next.and_time(chrono::NaiveTime::MIN).and_utc(),
            statuses: vec![DocumentStatus::Complete, DocumentStatus::Void],
        })
    }

    pub fn matches(&self, record: &SourceRecord) -> bool {
        record.created_at >= self.created_from
            && record.created_at <= self.created_to
            && self.statuses.contains(&record.status)
    }
}

/// Ordered source of documents. `close` is called once on every exit path.
pub trait RecordSource {
    fn name(&self) -> &str;

    async fn fetch(&self, query: &DocumentQuery) -> Result<Vec<SourceRecord>, StoreError>;

    async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    name: String,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("records")
            .to_string();
        Self { path, name }
    }
}

impl RecordSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &DocumentQuery) -> Result<Vec<SourceRecord>, StoreError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Read {
                path: self.path.clone(),
                source,
            })?;
        let records: Vec<SourceRecord> =
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(records.into_iter().filter(|r| query.matches(r)).collect())
    }

    async fn close(&self) {}
}
