//! Инициализация логирования: фильтр, консольный и файловый вывод.

pub mod config;
mod filters;
mod formatter;
pub mod handle;
mod report;
mod sinks;

pub use config::{FileSinkConfig, LogFormat, LogRotation, LoggingConfig};
pub use handle::LoggingHandle;
pub(crate) use report::log_error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vestnik_error::ConfigError;

/// Устанавливает глобальный subscriber по конфигурации.
///
/// Возвращает ошибку, если конфигурация некорректна, файл логов нельзя
/// открыть или глобальный subscriber уже установлен.
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, ConfigError> {
    config.apply_env_overrides();
    config.validate()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();
    layers.push(sinks::console::layer_with_config(&config));

    let file_guard = match &config.file {
        Some(file) => {
            let (layer, guard) = sinks::file::layer_with_config(&config, file)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| ConfigError::Logging {
            reason: e.to_string(),
        })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        format = ?config.format,
        file = ?config.file.as_ref().map(|f| f.dir.display().to_string()),
        "logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
