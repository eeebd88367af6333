//! Interface de terminal do comando `check`: spinner durante as verificações
//! e uma linha colorida por resultado.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

/// Acumula os resultados das verificações executadas pela CLI.
pub struct CheckReport {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    failures: usize,
}

impl CheckReport {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            failures: 0,
        }
    }

    /// Atualiza o spinner com o que está sendo verificado.
    pub fn probing(&self, what: &str) {
        self.pb.set_message(format!("Checking {what}..."));
    }

    pub fn pass(&self, label: &str, detail: &str) {
        self.pb
            .println(format!("  {} {label}: {detail}", self.green.apply_to("✓")));
    }

    /// Um problema que não impede o nó de iniciar.
    pub fn warn(&self, label: &str, detail: &str) {
        self.pb
            .println(format!("  {} {label}: {detail}", self.yellow.apply_to("!")));
    }

    pub fn fail(&mut self, label: &str, detail: &str) {
        self.failures += 1;
        self.pb
            .println(format!("  {} {label}: {detail}", self.red.apply_to("✗")));
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Limpa o spinner e imprime o resumo. Retorna se todas as verificações
    /// passaram.
    pub fn finish(self) -> bool {
        self.pb.finish_and_clear();
        if self.failures() == 0 {
            println!("{}", self.green.apply_to("Node is ready to run jobs"));
            true
        } else {
            println!(
                "{}",
                self.red
                    .apply_to(format!("{} check(s) failed", self.failures))
            );
            false
        }
    }
}
