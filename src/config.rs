//! Configuração do nó carregada a partir de `bounty-node.toml`.
//!
//! A struct [`NodeConfig`] contém todos os parâmetros configuráveis do nó.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente `BOUNTY_NODE_*` têm precedência sobre o arquivo.
//! O valor carregado é passado explicitamente ao orquestrador e a cada job.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Nome do arquivo procurado no diretório de trabalho.
pub const DEFAULT_CONFIG_FILE: &str = "bounty-node.toml";

/// Placeholder obrigatório em `storage_dir`, para que jobs nunca dividam a mesma raiz.
pub const JOB_ID_PLACEHOLDER: &str = "$JOB_ID";
pub const TIMESTAMP_PLACEHOLDER: &str = "$TIMESTAMP";

/// Configuração de nível superior de um nó executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Nome legível do nó, usado no registro.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Conta dona do nó, que assina as chamadas ao ledger.
    #[serde(default = "default_account_id")]
    pub account_id: String,

    /// Identidade do nó. `$NODE_NAME` e `$ACCOUNT_ID` são preenchidos na carga.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Apenas eventos emitidos por este coordenador são tratados.
    #[serde(default = "default_coordinator_id")]
    pub coordinator_id: String,

    /// Endpoint do feed de eventos.
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,

    /// Gateway JSON-RPC do ledger.
    #[serde(default = "default_ledger_url")]
    pub ledger_url: String,

    /// Diretório de trabalho de cada job. Deve conter `$JOB_ID`.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    #[serde(default = "default_container_name_format")]
    pub container_name_format: String,

    #[serde(default = "default_image_name_format")]
    pub image_name_format: String,

    /// Capacidade do armazenamento transitório de resultados.
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Endereço de escuta do painel de progresso.
    #[serde(default = "default_dashboard_addr")]
    pub dashboard_addr: String,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage: StoragePolicy,
}

/// O que limpar no runtime de containers após cada execução.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Remove todos os recursos não usados do runtime. Implica a limpeza de imagens.
    #[serde(default)]
    pub purge_system_after_run: bool,

    /// Remove imagens não usadas (incluindo imagens base).
    #[serde(default)]
    pub purge_images_after_run: bool,

    /// Remove o container do job, caso o `--rm` não tenha removido.
    #[serde(default = "default_true")]
    pub remove_container_after_run: bool,

    /// Remove a imagem construída para o job.
    #[serde(default = "default_true")]
    pub remove_image_after_run: bool,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            purge_system_after_run: false,
            purge_images_after_run: false,
            remove_container_after_run: true,
            remove_image_after_run: true,
        }
    }
}

fn default_node_name() -> String {
    "node1".to_string()
}

fn default_account_id() -> String {
    "test1.test.near".to_string()
}

fn default_node_id() -> String {
    "$NODE_NAME.node.$ACCOUNT_ID".to_string()
}

fn default_coordinator_id() -> String {
    "coordinator.test.near".to_string()
}

fn default_websocket_url() -> String {
    "ws://localhost:7071".to_string()
}

fn default_ledger_url() -> String {
    "http://localhost:3030".to_string()
}

fn default_storage_dir() -> String {
    "$HOME/.local/bounty_data/$JOB_ID".to_string()
}

fn default_container_name_format() -> String {
    "bounty-$JOB_ID-$TIMESTAMP".to_string()
}

fn default_image_name_format() -> String {
    "$JOB_ID-$TIMESTAMP".to_string()
}

fn default_max_records() -> usize {
    50
}

fn default_dashboard_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            account_id: default_account_id(),
            node_id: default_node_id(),
            coordinator_id: default_coordinator_id(),
            websocket_url: default_websocket_url(),
            ledger_url: default_ledger_url(),
            storage_dir: default_storage_dir(),
            container_name_format: default_container_name_format(),
            image_name_format: default_image_name_format(),
            max_records: default_max_records(),
            dashboard_addr: default_dashboard_addr(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            log_level: default_log_level(),
            storage: StoragePolicy::default(),
        }
    }
}

impl NodeConfig {
    /// Carrega a configuração de `path`, ou de `bounty-node.toml` no diretório
    /// de trabalho quando nenhum caminho é informado. Se o arquivo padrão não
    /// existir, usa os defaults; um arquivo explícito ausente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        let home = std::env::var("HOME").unwrap_or_default();
        config.resolve(&home);
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str::<NodeConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Aplica as sobrescritas `BOUNTY_NODE_*`. `lookup` retorna o valor de uma
    /// variável, se definida.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let strings: [(&str, &mut String); 10] = [
            ("BOUNTY_NODE_NODE_NAME", &mut self.node_name),
            ("BOUNTY_NODE_ACCOUNT_ID", &mut self.account_id),
            ("BOUNTY_NODE_NODE_ID", &mut self.node_id),
            ("BOUNTY_NODE_COORDINATOR_ID", &mut self.coordinator_id),
            ("BOUNTY_NODE_WEBSOCKET_URL", &mut self.websocket_url),
            ("BOUNTY_NODE_LEDGER_URL", &mut self.ledger_url),
            ("BOUNTY_NODE_STORAGE_DIR", &mut self.storage_dir),
            ("BOUNTY_NODE_CONTAINER_NAME_FORMAT", &mut self.container_name_format),
            ("BOUNTY_NODE_IMAGE_NAME_FORMAT", &mut self.image_name_format),
            ("BOUNTY_NODE_DASHBOARD_ADDR", &mut self.dashboard_addr),
        ];
        for (key, field) in strings {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }

        if let Some(value) = lookup("BOUNTY_NODE_MAX_RECORDS").and_then(|v| v.parse().ok()) {
            self.max_records = value;
        }

        let flags: [(&str, &mut bool); 4] = [
            (
                "BOUNTY_NODE_PURGE_SYSTEM_AFTER_RUN",
                &mut self.storage.purge_system_after_run,
            ),
            (
                "BOUNTY_NODE_PURGE_IMAGES_AFTER_RUN",
                &mut self.storage.purge_images_after_run,
            ),
            (
                "BOUNTY_NODE_REMOVE_CONTAINER_AFTER_RUN",
                &mut self.storage.remove_container_after_run,
            ),
            (
                "BOUNTY_NODE_REMOVE_IMAGE_AFTER_RUN",
                &mut self.storage.remove_image_after_run,
            ),
        ];
        for (key, field) in flags {
            if let Some(value) = lookup(key) {
                *field = value == "true";
            }
        }
    }

    /// Preenche os placeholders do nó. `$JOB_ID` e `$TIMESTAMP` permanecem
    /// até o despacho de um job.
    pub fn resolve(&mut self, home: &str) {
        let values = [
            ("$NODE_NAME", self.node_name.as_str()),
            ("$ACCOUNT_ID", self.account_id.as_str()),
            ("$HOME", home),
        ];
        self.node_id = fill_placeholders(&self.node_id, &values);

        let values = [
            ("$NODE_NAME", self.node_name.as_str()),
            ("$NODE_ID", self.node_id.as_str()),
            ("$ACCOUNT_ID", self.account_id.as_str()),
            ("$HOME", home),
        ];
        self.storage_dir = fill_placeholders(&self.storage_dir, &values);
        self.container_name_format = fill_placeholders(&self.container_name_format, &values);
        self.image_name_format = fill_placeholders(&self.image_name_format, &values);
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if !self.storage_dir.contains(JOB_ID_PLACEHOLDER) {
            return Err(NodeError::Config(format!(
                "The {JOB_ID_PLACEHOLDER} placeholder must appear in storage_dir to avoid collisions"
            )));
        }
        if self.max_records == 0 {
            return Err(NodeError::Config("max_records must be at least 1".into()));
        }
        if self.coordinator_id.trim().is_empty() {
            return Err(NodeError::Config("coordinator_id must not be empty".into()));
        }
        for (field, format) in [
            ("image_name_format", &self.image_name_format),
            ("container_name_format", &self.container_name_format),
        ] {
            if !format.contains(TIMESTAMP_PLACEHOLDER) {
                tracing::warn!(
                    field,
                    format = %format,
                    "Name format lacks $TIMESTAMP, retries of a job will reuse names"
                );
            }
        }
        self.dashboard_socket_addr()?;
        Ok(())
    }

    pub fn dashboard_socket_addr(&self) -> Result<SocketAddr, NodeError> {
        self.dashboard_addr.parse().map_err(|e| {
            NodeError::Config(format!(
                "invalid dashboard_addr {}: {e}",
                self.dashboard_addr
            ))
        })
    }

    /// Diretório de trabalho de um job, derivado apenas do id do job.
    pub fn storage_root(&self, job_id: &str) -> PathBuf {
        PathBuf::from(fill_placeholders(
            &self.storage_dir,
            &[(JOB_ID_PLACEHOLDER, job_id)],
        ))
    }

    /// Tag da imagem de uma tentativa de um job. Em minúsculas, pois o runtime
    /// de containers rejeita nomes de repositório com maiúsculas.
    pub fn image_name(&self, job_id: &str, timestamp: i64) -> String {
        let stamp = timestamp.to_string();
        fill_placeholders(
            &self.image_name_format,
            &[(JOB_ID_PLACEHOLDER, job_id), (TIMESTAMP_PLACEHOLDER, &stamp)],
        )
        .to_lowercase()
    }

    pub fn container_name(&self, job_id: &str, timestamp: i64) -> String {
        let stamp = timestamp.to_string();
        fill_placeholders(
            &self.container_name_format,
            &[(JOB_ID_PLACEHOLDER, job_id), (TIMESTAMP_PLACEHOLDER, &stamp)],
        )
    }
}

/// Substitui cada `$PLACEHOLDER` listado em `values`.
pub fn fill_placeholders(input: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(input.to_string(), |acc, (key, value)| acc.replace(key, value))
}
