pub mod client;
pub mod error;
pub mod timer;

pub use client::{load_ca_bundle, CallFailure, RemoteClient, RemoteResponse};
pub use error::CallError;
pub use timer::{AttemptRecord, CallTimer, Timed};
