use thiserror::Error;

use crate::{BrokerError, ConfigError, ErrorExt, StatusCode};

/// Ошибки подсистемы pub/sub.
///
/// Эти ошибки никогда не пробрасываются вызывающему `publish`: они
/// логируются и учитываются в статистике канала.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    /// Подписчик вернул ошибку или запаниковал
    #[error("subscriber on '{topic}' failed: {reason}")]
    SubscriberFailed { topic: String, reason: String },
    /// Подписка на брокере так и не стала активной
    #[error("subscription to '{topic}' not ready after {attempts} attempts")]
    ListenerInitTimeout { topic: String, attempts: u32 },
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ErrorExt for PubSubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::SubscriberFailed { .. } => StatusCode::SubscriberFailed,
            Self::ListenerInitTimeout { .. } => StatusCode::SubscriptionNotReady,
            Self::Broker(e) => e.status_code(),
            Self::Config(e) => e.status_code(),
        }
    }
}
