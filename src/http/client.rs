use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Client, Method};
use serde::Serialize;
use tracing::warn;

use super::error::CallError;
use super::timer::{CallTimer, Timed};

/// Body reported when the response body cannot be read.
pub const UNREADABLE_BODY: &str = "unknown error";

/// A failed call together with its timing.
pub type CallFailure = Timed<CallError>;

/// Status and body of a 2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

/// Outbound HTTP agent for one job run.
///
/// Idle connections are not pooled, so dropping the client at the end of the
/// run releases everything it opened.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CallError> {
        Self::builder(base_url, timeout).build()
    }

    pub fn builder(base_url: impl Into<String>, timeout: Duration) -> RemoteClientBuilder {
        RemoteClientBuilder {
            base_url: base_url.into(),
            timeout,
            api_key: None,
            roots: Vec::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for `path` appended to the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one request and time it.
    ///
    /// Non-2xx statuses come back as [`CallError::Status`]. The duration is
    /// attached on both paths.
    pub async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Timed<RemoteResponse>, CallFailure>
    where
        B: Serialize + ?Sized,
    {
        CallTimer::time(self.dispatch(method, path, body)).await
    }

    async fn dispatch<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<RemoteResponse, CallError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self
            .client
            .request(method, self.url(path))
            .header("accept", "application/json")
            .timeout(self.timeout);

        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(status = status.as_u16(), error = %e, "failed to read response body");
                UNREADABLE_BODY.to_string()
            }
        };

        if !status.is_success() {
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(RemoteResponse {
            status: status.as_u16(),
            body,
        })
    }
}

pub struct RemoteClientBuilder {
    base_url: String,
    timeout: Duration,
    api_key: Option<String>,
    roots: Vec<Certificate>,
}

impl RemoteClientBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Trust these certificates in addition to the default roots.
    pub fn extra_roots(mut self, roots: Vec<Certificate>) -> Self {
        self.roots.extend(roots);
        self
    }

    pub fn build(self) -> Result<RemoteClient, CallError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(0);
        for root in self.roots {
            builder = builder.add_root_certificate(root);
        }
        let client = builder
            .build()
            .map_err(|e| CallError::Build(e.to_string()))?;

        Ok(RemoteClient {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key,
            timeout: self.timeout,
        })
    }
}

/// Read a PEM bundle and parse every certificate in it.
pub fn load_ca_bundle(path: &Path) -> Result<Vec<Certificate>, CallError> {
    let pem = std::fs::read(path)
        .map_err(|e| CallError::Build(format!("cannot read CA bundle {}: {e}", path.display())))?;
    let certs = Certificate::from_pem_bundle(&pem)
        .map_err(|e| CallError::Build(format!("invalid CA bundle {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(CallError::Build(format!(
            "CA bundle {} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}
