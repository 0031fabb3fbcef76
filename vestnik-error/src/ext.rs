use std::error::Error;

use crate::{LogLevel, StatusCode};

/// Расширение для ошибок библиотеки (object-safe).
///
/// Статус определяет, на каком уровне ошибка попадает в лог.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки.
    fn status_code(&self) -> StatusCode;

    /// Уровень логирования; по умолчанию берётся из статуса.
    fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }
}
