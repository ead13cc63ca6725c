//! Timer-triggered HTTP jobs.
//!
//! Each job run drives its remote calls through a [`retry::RetryExecutor`],
//! times every call with [`http::CallTimer`], optionally cuts its work into
//! [`batch::Batch`]es, and reports events and request records through a
//! run-scoped [`telemetry::TelemetryReporter`].

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod retry;
pub mod store;
pub mod telemetry;

pub use error::{FailureKind, JobError, RetryError};
