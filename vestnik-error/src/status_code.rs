use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки конфигурации
/// - 4xxx: Подписчики и каналы
/// - 6xxx: Сеть / IO / брокер
///
/// `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx: Общие ошибки ===
    Internal = 1003,

    // === 2xxx: Ошибки конфигурации ===
    InvalidConfig = 2010,

    // === 4xxx: Подписчики и каналы ===
    SubscriberFailed = 4010,

    // === 6xxx: Сеть/IO/брокер ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    BrokerUnavailable = 6010,
    SubscriptionNotReady = 6011,
    MessagesLost = 6012,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Рекомендуемый уровень логирования для данного кода.
    ///
    /// Сбои, после которых сообщение не доставлено или слушатель не
    /// запущен, идут на `Error`; сетевые сбои, которые переживаются
    /// переподключением или локальным режимом, на `Warn`.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Internal
            | Self::SubscriberFailed
            | Self::SubscriptionNotReady
            | Self::ProtocolError => LogLevel::Error,
            Self::InvalidConfig
            | Self::Io
            | Self::ConnectionClosed
            | Self::Timeout
            | Self::ConnectionFailed
            | Self::BrokerUnavailable
            | Self::MessagesLost => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
