//! Obtenção e extração de pacotes de jobs.
//!
//! O [`PackageFetcher`] materializa o pacote de um job no disco local. O
//! [`HostFetcher`] de produção clona via libgit2, baixa via `reqwest`,
//! extrai tarballs gzip no próprio processo e repassa arquivos zip ao `unzip`.

pub mod host;

use std::future::Future;
use std::path::Path;

use thiserror::Error;

pub use host::HostFetcher;

/// Formatos de arquivo que um pacote baixado pode usar, detectados pelo nome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Arquivo zip. As entradas são extraídas sem os diretórios.
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} exited with code {code}: {stderr}")]
    Tool {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub trait PackageFetcher: Send + Sync + 'static {
    /// Nomes das ferramentas do host exigidas por este fetcher que estão ausentes.
    fn missing_tools(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Clona uma cópia de trabalho completa de `url` em `dest`.
    fn clone_repository(
        &self,
        url: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;

    /// Baixa `url` para o arquivo `dest`.
    fn download(&self, url: &str, dest: &Path)
    -> impl Future<Output = Result<(), FetchError>> + Send;

    /// Extrai `archive` em `dest`.
    fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest: &Path,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}
