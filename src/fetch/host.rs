use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use git2::Repository;
use reqwest::Client;

use super::{ArchiveFormat, FetchError, PackageFetcher};
use crate::runtime::{exec, tool_available};

const UNZIP: &str = "unzip";

/// Obtém pacotes para o sistema de arquivos local do nó.
pub struct HostFetcher {
    client: Client,
}

impl HostFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

fn unpack_tar_gz(archive: &Path, dest: &Path) -> Result<(), FetchError> {
    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.unpack(dest)?;
    Ok(())
}

impl PackageFetcher for HostFetcher {
    async fn missing_tools(&self) -> Vec<String> {
        if tool_available(UNZIP).await {
            Vec::new()
        } else {
            vec![format!("{UNZIP} is not installed")]
        }
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        tracing::info!(url, dest = %dest.display(), "Cloning repository");
        let url = url.to_string();
        let dest: PathBuf = dest.to_path_buf();
        tokio::task::spawn_blocking(move || Repository::clone(&url, &dest).map(|_| ())).await??;
        Ok(())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        tracing::info!(url, dest = %dest.display(), "Downloading package");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    async fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest: &Path,
    ) -> Result<(), FetchError> {
        tracing::debug!(archive = %archive.display(), ?format, "Extracting package");
        match format {
            ArchiveFormat::TarGz => {
                let archive = archive.to_path_buf();
                let dest = dest.to_path_buf();
                tokio::task::spawn_blocking(move || unpack_tar_gz(&archive, &dest)).await?
            }
            ArchiveFormat::Zip => {
                // -o sobrescreve, -j descarta os diretórios
                let archive = archive.display().to_string();
                let dest = dest.display().to_string();
                let output = exec(UNZIP, &["-oj", &archive, "-d", &dest]).await?;
                if output.success() {
                    Ok(())
                } else {
                    Err(FetchError::Tool {
                        program: UNZIP.to_string(),
                        code: output.code,
                        stderr: output.stderr.trim().to_string(),
                    })
                }
            }
        }
    }
}
