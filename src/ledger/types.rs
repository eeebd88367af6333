//! Registros trocados com o ledger do coordenador.
//!
//! Os nomes dos campos seguem o JSON snake_case do ledger, para que as structs
//! sejam decodificadas diretamente dos resultados RPC.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Como o pacote de um job é obtido.
///
/// Valores desconhecidos são mantidos em vez de rejeitados na decodificação:
/// um protocolo não suportado é falha de setup do job, não um evento descartado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RetrievalProtocol {
    /// Clone de um repositório versionado.
    Git,
    /// Download direto via HTTP(S).
    Https,
    Unsupported(String),
}

impl From<String> for RetrievalProtocol {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "GIT" => RetrievalProtocol::Git,
            "HTTPS" | "HTTP" => RetrievalProtocol::Https,
            _ => RetrievalProtocol::Unsupported(value),
        }
    }
}

impl From<RetrievalProtocol> for String {
    fn from(value: RetrievalProtocol) -> Self {
        match value {
            RetrievalProtocol::Git => "GIT".to_string(),
            RetrievalProtocol::Https => "HTTPS".to_string(),
            RetrievalProtocol::Unsupported(other) => other,
        }
    }
}

impl fmt::Display for RetrievalProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalProtocol::Git => write!(f, "GIT"),
            RetrievalProtocol::Https => write!(f, "HTTPS"),
            RetrievalProtocol::Unsupported(other) => write!(f, "{other}"),
        }
    }
}

/// Uma unidade de trabalho anunciada, como armazenada pelo coordenador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub coordinator_id: String,
    pub file_location: String,
    pub file_download_protocol: RetrievalProtocol,
    #[serde(default)]
    pub network_required: bool,
    #[serde(default)]
    pub gpu_required: bool,
    #[serde(default)]
    pub min_nodes: u64,
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub elected_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_args: Option<Vec<String>>,
}

/// Registro de um nó, como armazenado pelo coordenador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub owner_id: String,
    pub allow_network: bool,
    pub allow_gpu: bool,
    /// Milissegundos permitidos para publicar uma resposta.
    pub absolute_timeout: u64,
    #[serde(default)]
    pub successful_runs: u64,
    #[serde(default)]
    pub failed_runs: u64,
    #[serde(default)]
    pub rejected_runs: u64,
    #[serde(default)]
    pub unanswered_runs: u64,
    #[serde(default)]
    pub registration_time: u64,
}

/// Status anexado a uma resposta publicada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerStatus {
    Success,
    Failure,
    Reject,
}

/// Payload de `post_answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub job_id: String,
    pub node_id: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: AnswerStatus,
}

/// Payload de `register_node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub name: String,
    pub absolute_timeout: u64,
    pub allow_network: bool,
    pub allow_gpu: bool,
    /// Depósito anexado, na menor unidade do ledger.
    #[serde(with = "amount")]
    pub deposit: u128,
}

/// Valores trafegam como strings decimais; números JSON não os comportam.
pub mod amount {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
