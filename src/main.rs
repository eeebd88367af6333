mod cli;
mod config;
mod dashboard;
mod error;
mod execution;
mod fetch;
mod ledger;
mod node;
mod runtime;
mod shutdown;
mod store;
mod ui;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::NodeConfig;
use dashboard::DashboardState;
use fetch::HostFetcher;
use ledger::{Ledger, RpcLedger};
use node::Node;
use runtime::DockerCli;
use store::ResultStore;
use ui::CheckReport;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = NodeConfig::load(cli.config.as_deref())?;

    let default_level = if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Run => run(config).await,
        Command::Check => check(config).await,
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: NodeConfig) -> Result<()> {
    config.validate()?;
    let dashboard_addr = config.dashboard_socket_addr()?;
    let config = Arc::new(config);

    let ledger = RpcLedger::new(config.ledger_url.clone(), config.account_id.clone())
        .context("failed to create ledger client")?;
    let fetcher = HostFetcher::new().context("failed to create package fetcher")?;
    let store = Arc::new(ResultStore::new(config.max_records));

    let mut node = Node::new(
        Arc::clone(&config),
        Arc::new(ledger),
        Arc::new(DockerCli::default()),
        Arc::new(fetcher),
        Arc::clone(&store),
    );
    node.bootstrap().await?;

    let shutdown = shutdown::install_shutdown_handler();
    let dashboard = tokio::spawn(dashboard::run_dashboard(
        dashboard_addr,
        DashboardState { store },
        shutdown.clone(),
    ));

    let result = node::feed::consume(node, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = dashboard.await {
        tracing::warn!(error = %e, "Dashboard task ended abnormally");
    }
    result?;
    tracing::info!("Node stopped");
    Ok(())
}

async fn check(config: NodeConfig) -> Result<()> {
    let mut report = CheckReport::start("Checking node");

    report.probing("configuration");
    match config.validate() {
        Ok(()) => report.pass("config", &format!("node id {}", config.node_id)),
        Err(e) => report.fail("config", &e.to_string()),
    }

    report.probing("host tools");
    let fetcher = HostFetcher::new().context("failed to create package fetcher")?;
    let ledger = Arc::new(
        RpcLedger::new(config.ledger_url.clone(), config.account_id.clone())
            .context("failed to create ledger client")?,
    );
    let node = Node::new(
        Arc::new(config.clone()),
        Arc::clone(&ledger),
        Arc::new(DockerCli::default()),
        Arc::new(fetcher),
        Arc::new(ResultStore::new(1)),
    );
    let missing = node.missing_tools().await;
    if missing.is_empty() {
        report.pass("tools", "all required software found");
    } else {
        for tool in &missing {
            report.fail("tools", tool);
        }
    }

    report.probing("ledger");
    match ledger.get_node(&config.node_id).await {
        Ok(record) => report.pass(
            "ledger",
            &format!(
                "registered (network {}, gpu {}, timeout {} ms)",
                record.allow_network, record.allow_gpu, record.absolute_timeout
            ),
        ),
        Err(e) => report.warn("ledger", &format!("node not registered yet: {e}")),
    }

    if report.finish() {
        Ok(())
    } else {
        anyhow::bail!("node is not ready")
    }
}
