use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vestnik_error::ConfigError;

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Многострочный вывод для разработки.
    Pretty,
    /// Одна строка на событие.
    #[default]
    Compact,
    /// JSON, одна запись на строку.
    Json,
}

/// Период ротации файла логов.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Настройки файлового вывода.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSinkConfig {
    pub dir: PathBuf,
    /// Префикс имени файла, к нему добавляется дата при ротации.
    pub prefix: String,
    pub rotation: LogRotation,
    pub format: LogFormat,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень или директива `EnvFilter` (например `info` или
    /// `vestnik=debug,warn`). `RUST_LOG` имеет приоритет.
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_line_numbers: bool,
    pub file: Option<FileSinkConfig>,
}

impl LoggingConfig {
    /// Переопределения из `VESTNIK_LOG_LEVEL` и `VESTNIK_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("VESTNIK_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = std::env::var("VESTNIK_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "pretty" => self.format = LogFormat::Pretty,
                "compact" => self.format = LogFormat::Compact,
                "json" => self.format = LogFormat::Json,
                other => eprintln!("Unknown VESTNIK_LOG_FORMAT '{other}', keeping {:?}", self.format),
            }
        }
    }

    /// Директива фильтра, построенная из конфигурации.
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            "info".to_string()
        } else {
            level.to_string()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let directive = self.build_filter_directive();
        if tracing_subscriber::EnvFilter::try_new(&directive).is_err() {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("invalid filter directive '{directive}'"),
            ));
        }
        if let Some(file) = &self.file {
            if file.prefix.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "logging.file.prefix",
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            prefix: "vestnik.log".to_string(),
            rotation: LogRotation::default(),
            format: LogFormat::Json,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
            with_line_numbers: false,
            file: None,
        }
    }
}
