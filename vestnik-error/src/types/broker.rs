use std::io;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки взаимодействия с брокером сообщений.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Не удалось установить соединение
    #[error("failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },
    /// Соединение не установлено за отведённое время
    #[error("connection to {address} timed out")]
    ConnectionTimeout { address: String },
    /// Ошибка ввода-вывода
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    /// Нарушение протокола (неожиданный фрейм, мусор в потоке)
    #[error("protocol error: {reason}")]
    Protocol { reason: String },
    /// Брокер вернул ошибку
    #[error("broker error: {message}")]
    Server { message: String },
    /// Таймаут чтения или записи
    #[error("broker operation timed out")]
    Timeout,
    /// Соединение или подписка уже закрыты
    #[error("broker connection is closed")]
    Closed,
    /// Клиент брокера недоступен в этой сборке
    #[error("broker client unavailable: {reason}")]
    Unavailable { reason: String },
    /// Подписка отстала, часть сообщений потеряна
    #[error("subscription lagged, {skipped} messages lost")]
    Lagged { skipped: u64 },
}

impl BrokerError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// `true`, если соединение больше нельзя использовать.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed | Self::Unavailable { .. })
    }
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionTimeout { .. } => {
                StatusCode::ConnectionFailed
            }
            Self::Io { .. } => StatusCode::Io,
            Self::Protocol { .. } => StatusCode::ProtocolError,
            Self::Server { .. } => StatusCode::Internal,
            Self::Timeout => StatusCode::Timeout,
            Self::Closed => StatusCode::ConnectionClosed,
            Self::Unavailable { .. } => StatusCode::BrokerUnavailable,
            Self::Lagged { .. } => StatusCode::MessagesLost,
        }
    }
}

// Конверсия из io::Error
impl From<io::Error> for BrokerError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Self::Closed,
            kind => Self::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}
