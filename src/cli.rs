//! Interface de linha de comando baseada em clap.
//!
//! Cada subcomando dispara uma execução de job. As flags globais trazem o que
//! o agendador passaria: o arquivo de configuração, se o disparo está
//! atrasado e o id da invocação usado como tag de correlação da telemetria.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::config::{LandingsConfig, ReconciliationConfig};

/// Jobs HTTP disparados por timer, com retentativas e telemetria de requisições.
#[derive(Debug, Parser)]
#[command(name = "timerjobs", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para um arquivo de configuração TOML (padrão: ./timerjobs.toml, se existir).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Marca esta invocação como atrasada em relação ao agendamento.
    #[arg(long, global = true, default_value_t = false)]
    pub past_due: bool,

    /// Id da invocação usado para correlacionar a telemetria (aleatório se omitido).
    #[arg(long, global = true)]
    pub invocation_id: Option<String>,

    /// Habilita logs de depuração (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pede ao data reader para iniciar o job de landings e relatórios.
    Landings(LandingsArgs),

    /// Envia em lotes os certificados completos e anulados ao serviço de continuidade.
    Reconcile(ReconcileArgs),
}

#[derive(Debug, Default, Args)]
pub struct LandingsArgs {
    /// Endpoint que recebe o POST.
    #[arg(long)]
    pub url: Option<String>,

    /// Timeout por chamada em milissegundos.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Retentativas após a primeira tentativa.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Atraso base entre tentativas em milissegundos.
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Bundle PEM com raízes confiáveis extras.
    #[arg(long)]
    pub ca_bundle: Option<PathBuf>,
}

#[derive(Debug, Default, Args)]
pub struct ReconcileArgs {
    /// URL base do serviço de continuidade.
    #[arg(long)]
    pub url: Option<String>,

    /// Caminho anexado à URL base.
    #[arg(long)]
    pub api_name: Option<String>,

    /// Certificados por requisição.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Primeira data de criação incluída (AAAA-MM-DD).
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Última data de criação incluída (AAAA-MM-DD).
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Tentativas por lote.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Atraso base entre tentativas em milissegundos.
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Exportação JSON dos documentos de certificado.
    #[arg(long)]
    pub records: Option<PathBuf>,
}

impl LandingsArgs {
    pub fn apply(&self, config: &mut LandingsConfig) {
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(timeout) = self.timeout_ms {
            config.timeout_ms = timeout;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay_ms = delay;
        }
        if let Some(path) = &self.ca_bundle {
            config.ca_bundle = Some(path.clone());
        }
    }
}

impl ReconcileArgs {
    pub fn apply(&self, config: &mut ReconciliationConfig) {
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(name) = &self.api_name {
            config.api_name = name.clone();
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(date) = self.start_date {
            config.start_date = date;
        }
        if let Some(date) = self.end_date {
            config.end_date = date;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay_ms = delay;
        }
        if let Some(path) = &self.records {
            config.records_path = path.clone();
        }
    }
}
