use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки конфигурации (pub/sub и логирования).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Значение поля не проходит валидацию
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
    /// Не удалось собрать конфигурацию из источников
    #[error("failed to load configuration: {reason}")]
    Load { reason: String },
    /// Ошибка инициализации логирования
    #[error("failed to initialize logging: {reason}")]
    Logging { reason: String },
}

impl ConfigError {
    pub fn invalid(
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Invalid { .. } => StatusCode::InvalidConfig,
            Self::Load { .. } => StatusCode::InvalidConfig,
            Self::Logging { .. } => StatusCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет Display и статус для ConfigError::Invalid.
    #[test]
    fn test_invalid_display_and_status() {
        let err = ConfigError::invalid("max_history", "must be greater than zero");
        assert_eq!(err.status_code(), StatusCode::InvalidConfig);
        assert_eq!(
            err.to_string(),
            "invalid value for 'max_history': must be greater than zero"
        );
    }
}
