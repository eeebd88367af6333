//! Tipos de erro do cliente do gateway do ledger.

use thiserror::Error;

/// Erros que podem ocorrer na comunicação com o ledger do coordenador.
///
/// Uma chamada de alteração que falha é uma falha de publicação: quem chamou
/// pode tentar de novo, e um anúncio de retry posterior é o caminho de recuperação.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// O gateway respondeu com status HTTP fora de 2xx.
    #[error("ledger gateway error (status {status}): {message}")]
    Status { status: u16, message: String },

    /// A chamada chegou ao ledger, mas foi recusada.
    #[error("ledger call {method} failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// Uma chamada de consulta não retornou registro.
    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to decode ledger response: {0}")]
    Decode(String),

    /// DNS, conexão recusada, timeout.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_display() {
        let err = LedgerError::Rpc {
            method: "post_answer".into(),
            code: -32000,
            message: "job already complete".into(),
        };
        assert_eq!(
            err.to_string(),
            "ledger call post_answer failed (-32000): job already complete"
        );
    }

    #[test]
    fn status_error_display() {
        let err = LedgerError::Status {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(
            err.to_string(),
            "ledger gateway error (status 502): bad gateway"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LedgerError>();
    }
}
