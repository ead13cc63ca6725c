//! Configuração dos jobs carregada de `timerjobs.toml` e do ambiente.
//!
//! Todo valor tem um default. Variáveis de ambiente têm precedência sobre o
//! arquivo, e as flags da CLI (ver [`crate::cli`]) sobre ambos.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::JobError;
use crate::retry::{DelayPolicy, RetryPolicy};

const DEFAULT_PATH: &str = "timerjobs.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Chave de ativação da telemetria. Sem ela a telemetria fica desligada.
    #[serde(default)]
    pub instrumentation_key: Option<String>,

    /// Endpoint de ingestão dos envelopes de telemetria.
    #[serde(default = "default_telemetry_endpoint")]
    pub telemetry_endpoint: String,

    #[serde(default)]
    pub landings: LandingsConfig,

    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

// Endpoint padrão de ingestão do Application Insights.
fn default_telemetry_endpoint() -> String {
    "https://dc.services.visualstudio.com/v2/track".to_string()
}

/// Disparo de landings: um único POST, backoff linear em degraus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LandingsConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Retentativas após a primeira tentativa.
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Raízes PEM extras para o cliente HTTP.
    pub ca_bundle: Option<PathBuf>,
}

impl Default for LandingsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000/v1/jobs/landings".to_string(),
            timeout_ms: 600_000,
            retries: 4,
            retry_delay_ms: 300_000,
            ca_bundle: None,
        }
    }
}

/// Job de reconciliação: PUTs em lotes, backoff exponencial.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub url: String,
    pub api_key: String,
    pub api_name: String,
    pub batch_size: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Total de tentativas por lote.
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub records_path: PathBuf,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9100".to_string(),
            api_key: String::new(),
            api_name: "/api/certificates".to_string(),
            batch_size: 1000,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 2, 13).unwrap_or_default(),
            retries: 4,
            retry_delay_ms: 1000,
            timeout_ms: 60_000,
            records_path: PathBuf::from("exportCertificates.json"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrumentation_key: None,
            telemetry_endpoint: default_telemetry_endpoint(),
            landings: LandingsConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

impl Config {
    /// Carrega de `path`, ou de `timerjobs.toml` no diretório atual se existir,
    /// e depois aplica o ambiente do processo.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_PATH).exists() => Self::from_file(Path::new(DEFAULT_PATH))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Sobrescreve valores a partir de variáveis de ambiente. Valores vazios são ignorados.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("APPINSIGHTS_INSTRUMENTATIONKEY") {
            self.instrumentation_key = Some(key);
        }
        if let Some(endpoint) = var("TELEMETRY_ENDPOINT") {
            self.telemetry_endpoint = endpoint;
        }

        let l = &mut self.landings;
        if let Some(url) = var("DATA_READER_URL") {
            l.url = url;
        }
        if let Some(path) = var("CA_BUNDLE_PATH") {
            l.ca_bundle = Some(PathBuf::from(path));
        }
        set_parsed(&var, "TIMEOUT_IN_MS", &mut l.timeout_ms)?;
        set_parsed(&var, "NUMBER_OF_RETRIES", &mut l.retries)?;
        set_parsed(&var, "RETRY_DELAY_IN_MS", &mut l.retry_delay_ms)?;

        let r = &mut self.reconciliation;
        if let Some(url) = var("BUSINESS_CONTINUITY_URL") {
            r.url = url;
        }
        if let Some(key) = var("BUSINESS_CONTINUITY_KEY") {
            r.api_key = key;
        }
        if let Some(name) = var("API_NAME") {
            r.api_name = name;
        }
        if let Some(path) = var("RECORDS_PATH") {
            r.records_path = PathBuf::from(path);
        }
        set_parsed(&var, "BATCH_CERTIFICATES_NUMBER", &mut r.batch_size)?;
        set_parsed(&var, "QUERY_START_DATE", &mut r.start_date)?;
        set_parsed(&var, "QUERY_END_DATE", &mut r.end_date)?;
        set_parsed(&var, "NUMBER_OF_RETRIES", &mut r.retries)?;
        set_parsed(&var, "RETRY_DELAY_IN_MS", &mut r.retry_delay_ms)?;
        set_parsed(&var, "TIMEOUT_IN_MS", &mut r.timeout_ms)?;

        Ok(())
    }
}

fn set_parsed<T, F>(var: &F, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(e) => bail!("invalid value for {key} ({raw:?}): {e}"),
        }
    }
    Ok(())
}

fn check_url(field: &str, url: &str) -> Result<(), JobError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(JobError::Config(format!(
            "{field} must start with http:// or https:// (got {url:?})"
        )))
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    let tail: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{tail}")
}

impl LandingsConfig {
    /// `retries` tentativas extras após a primeira.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries.saturating_add(1),
            DelayPolicy::SteppedLinear {
                base_ms: self.retry_delay_ms,
            },
        )
    }

    pub fn validate(&self) -> Result<(), JobError> {
        check_url("landings url", &self.url)?;
        if self.timeout_ms == 0 {
            return Err(JobError::Config("landings timeout must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn summary(&self, instrumentation_key: Option<&str>) -> String {
        format!(
            "[url: {}][timeoutMs: {}][retries: {}][retryDelay: {}][policy: {}][instrumentationKey: {}]",
            self.url,
            self.timeout_ms,
            self.retries,
            self.retry_delay_ms,
            self.retry_policy(),
            instrumentation_key.map(mask).unwrap_or_else(|| "<unset>".into()),
        )
    }
}

impl ReconciliationConfig {
    /// `retries` tentativas no total por lote.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries,
            DelayPolicy::Exponential {
                base_ms: self.retry_delay_ms,
            },
        )
    }

    pub fn validate(&self) -> Result<(), JobError> {
        check_url("reconciliation url", &self.url)?;
        if self.api_key.trim().is_empty() {
            return Err(JobError::Config("reconciliation api_key is required".into()));
        }
        if self.batch_size == 0 {
            return Err(JobError::Config("batch size must be at least 1".into()));
        }
        if self.start_date > self.end_date {
            return Err(JobError::Config(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if self.timeout_ms == 0 {
            return Err(JobError::Config(
                "reconciliation timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "[url: {}{}][apiKey: {}][batchSize: {}][range: {}..{}][retries: {}][retryDelay: {}][policy: {}][records: {}]",
            self.url,
            self.api_name,
            mask(&self.api_key),
            self.batch_size,
            self.start_date,
            self.end_date,
            self.retries,
            self.retry_delay_ms,
            self.retry_policy(),
            self.records_path.display(),
        )
    }
}
