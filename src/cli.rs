//! Interface de linha de comando do nó baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, check, config)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Nó executor que roda bounties anunciadas como jobs em containers.
#[derive(Debug, Parser)]
#[command(name = "bounty-node", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração. Padrão: `bounty-node.toml` no diretório de
    /// trabalho, quando existir.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Logs em nível debug, a menos que RUST_LOG diga o contrário.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Registra o nó se necessário e executa os jobs anunciados até ser
    /// interrompido.
    Run,

    /// Verifica a configuração, as ferramentas do host e a conexão com o ledger.
    Check,

    /// Imprime a configuração efetiva em TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["bounty-node", "run"]);
        assert!(matches!(cli.command, Command::Run));
        assert!(cli.config.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["bounty-node", "check", "--config", "/etc/node.toml", "-v"]);
        assert!(matches!(cli.command, Command::Check));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/node.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["bounty-node"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
