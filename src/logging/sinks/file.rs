use std::fs;

use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{layer::Layer, registry::LookupSpan};
use vestnik_error::ConfigError;

use crate::logging::{
    config::{FileSinkConfig, LogRotation, LoggingConfig},
    formatter::{self, FormatOptions},
};

/// Слой записи в файл с ротацией через неблокирующий writer.
///
/// `WorkerGuard` нужно держать живым, пока идёт логирование: при его
/// удалении буфер сбрасывается на диск.
pub fn layer_with_config<S>(
    config: &LoggingConfig,
    file: &FileSinkConfig,
) -> Result<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard), ConfigError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(&file.dir).map_err(|e| ConfigError::Logging {
        reason: format!("cannot create log dir {}: {e}", file.dir.display()),
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(rotation(file.rotation))
        .filename_prefix(file.prefix.as_str())
        .build(&file.dir)
        .map_err(|e| ConfigError::Logging {
            reason: format!("cannot open log file in {}: {e}", file.dir.display()),
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = formatter::build_layer(
        FormatOptions {
            format: file.format,
            with_ansi: false,
            with_target: config.with_target,
            with_line_numbers: config.with_line_numbers,
        },
        writer,
    );
    Ok((layer, guard))
}

fn rotation(r: LogRotation) -> Rotation {
    match r {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}
