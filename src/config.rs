//! Configuração do motor carregada a partir de `esteira.toml`.
//!
//! A struct [`EngineConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ESTEIRA_LOG_FORMAT` tem precedência sobre o arquivo.

use std::path::Path;

use serde::Deserialize;

use crate::directory::Worker;
use crate::error::{EngineError, Result};

/// Formato da saída de logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Configuração de nível superior carregada de `esteira.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Mínimo de caracteres (após trim) do motivo de uma devolução.
    #[serde(default = "default_min_return_reason_len")]
    pub min_return_reason_len: usize,

    /// Quantas vezes um conflito de escrita é retentado relendo o estado.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Trata etapas cujo predecessor sumiu como bloqueadas.
    #[serde(default)]
    pub strict_dependencies: bool,

    /// Capacidade do canal de eventos.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Janela, em segundos, da deduplicação de notificações.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,

    /// Máximo de ids lembrados pela deduplicação.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Trabalhadores conhecidos pelo diretório estático.
    #[serde(default)]
    pub workers: Vec<Worker>,
}

// Valor padrão do motivo mínimo: 10 caracteres.
fn default_min_return_reason_len() -> usize {
    10
}

fn default_conflict_retries() -> u32 {
    1
}

fn default_event_buffer() -> usize {
    256
}

// Cinco minutos.
fn default_dedup_window_secs() -> i64 {
    300
}

fn default_dedup_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_return_reason_len: default_min_return_reason_len(),
            conflict_retries: default_conflict_retries(),
            strict_dependencies: false,
            event_buffer: default_event_buffer(),
            dedup_window_secs: default_dedup_window_secs(),
            dedup_capacity: default_dedup_capacity(),
            log_format: LogFormat::default(),
            workers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Carrega a configuração de `esteira.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new("esteira.toml");
        let config = if path.exists() {
            Self::read(path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Carrega a configuração de um arquivo explícito, que precisa existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::Config(format!(
                "config file {} not found",
                path.display()
            )));
        }
        Ok(Self::read(path)?.with_env_overrides())
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str::<EngineConfig>(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dedup_window_secs <= 0 {
            return Err(EngineError::Config(
                "dedup_window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    // Variável de ambiente tem precedência sobre o arquivo para o formato de log.
    fn with_env_overrides(mut self) -> Self {
        if let Some(format) = std::env::var("ESTEIRA_LOG_FORMAT")
            .ok()
            .as_deref()
            .and_then(LogFormat::parse)
        {
            self.log_format = format;
        }
        self
    }
}
