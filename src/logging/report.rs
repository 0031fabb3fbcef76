use vestnik_error::{ErrorExt, LogLevel};

/// Пишет ошибку в лог на уровне, который задаёт её статус.
pub(crate) fn log_error<E>(
    err: &E,
    topic: Option<&str>,
    message: &str,
) where
    E: ErrorExt + ?Sized,
{
    let status = err.status_code();
    match err.log_level() {
        LogLevel::Trace => tracing::trace!(topic, %status, error = %err, "{message}"),
        LogLevel::Debug => tracing::debug!(topic, %status, error = %err, "{message}"),
        LogLevel::Info => tracing::info!(topic, %status, error = %err, "{message}"),
        LogLevel::Warn => tracing::warn!(topic, %status, error = %err, "{message}"),
        LogLevel::Error => tracing::error!(topic, %status, error = %err, "{message}"),
    }
}
