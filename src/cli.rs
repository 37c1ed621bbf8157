//! Interface de linha de comando da esteira baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, run)
//! e flags globais (--config, --json, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// ESTEIRA, motor de execução de macro tarefas em etapas dependentes.
#[derive(Debug, Parser)]
#[command(name = "esteira", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração (padrão: ./esteira.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Imprime a visão final em JSON em vez de texto colorido.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o cenário embutido A → B → C com uma devolução.
    Demo,

    /// Cria o workflow de um arquivo de plano e reexecuta suas ações.
    Run {
        /// Arquivo TOML com `[workflow]`, `[[workers]]` e `[[actions]]`.
        plan: PathBuf,
    },
}
