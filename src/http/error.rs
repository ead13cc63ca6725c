//! Tipos de erro de uma única chamada remota.
//!
//! Todo [`CallError`] é transitório do ponto de vista do laço de
//! retentativas: um status sem sucesso é uma falha elegível para nova
//! tentativa, não uma resposta.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// O endpoint respondeu com status fora de 2xx.
    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// O timeout da chamada expirou antes de chegar uma resposta.
    #[error("request timed out")]
    Timeout,

    /// Falha de conexão, DNS, TLS ou leitura do corpo.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// O cliente HTTP não pôde ser construído (bundle de CA inválido, backend TLS).
    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

impl CallError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Status { status, .. } => Some(*status),
            CallError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CallError::Timeout
        } else {
            CallError::Network(e)
        }
    }
}
