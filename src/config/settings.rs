use std::{fmt, path::Path, time::Duration};

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use vestnik_error::ConfigError;

/// Порядок вызова асинхронных подписчиков внутри одного `publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// Подписчики вызываются по очереди, в порядке подписки.
    #[default]
    Sequential,
    /// Все асинхронные подписчики запускаются одновременно.
    Concurrent,
}

/// Параметры подключения к брокеру.
///
/// `Debug` не раскрывает пароль.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerParams {
    pub host: String,
    pub port: u16,
    /// Номер логической базы (`SELECT`).
    pub db: u32,
    pub password: Option<String>,
    /// Префикс, которым дополняется каждый топик на стороне брокера.
    pub channel_prefix: String,
    pub connect_timeout_ms: u64,
    /// Таймаут одной команды на командном соединении.
    pub io_timeout_ms: u64,
}

/// Параметры фоновой задачи, читающей сообщения брокера.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Сколько раз проверять готовность подписки, прежде чем сдаться.
    pub ready_retries: u32,
    pub ready_backoff_ms: u64,
    pub poll_timeout_ms: u64,
    /// Пауза после пустого опроса.
    pub idle_sleep_ms: u64,
    /// Пауза после ошибки опроса.
    pub error_backoff_ms: u64,
}

/// Полная конфигурация реестра каналов.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    pub broker_enabled: bool,
    pub broker: BrokerParams,
    /// Ёмкость истории каждого канала.
    pub max_history: usize,
    pub fanout: FanoutMode,
    pub listener: ListenerConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl BrokerParams {
    /// Адрес в виде `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Имя топика на стороне брокера.
    pub fn broker_topic(
        &self,
        topic: &str,
    ) -> String {
        format!("{}{}", self.channel_prefix, topic)
    }
}

impl ListenerConfig {
    pub fn ready_backoff(&self) -> Duration {
        Duration::from_millis(self.ready_backoff_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl PubSubConfig {
    pub const ENV_PREFIX: &'static str = "VESTNIK";

    /// Конфигурация только для локальных каналов.
    pub fn local() -> Self {
        Self::default()
    }

    /// Конфигурация с включённым брокером.
    pub fn with_broker(broker: BrokerParams) -> Self {
        Self {
            broker_enabled: true,
            broker,
            ..Self::default()
        }
    }

    /// Загружает конфигурацию из значений по умолчанию и окружения.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Загружает конфигурацию: значения по умолчанию, затем файл (если
    /// указан), затем переменные окружения `VESTNIK_*`.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = Config::try_from(&Self::default()).map_err(load_error)?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let cfg: Self = builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_error)?
            .try_deserialize()
            .map_err(load_error)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Проверяет значения, при которых реестр не сможет работать.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history == 0 {
            return Err(ConfigError::invalid(
                "max_history",
                "must be greater than zero",
            ));
        }
        if self.listener.ready_retries == 0 {
            return Err(ConfigError::invalid(
                "listener.ready_retries",
                "must be greater than zero",
            ));
        }
        if self.listener.poll_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "listener.poll_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.broker_enabled {
            if self.broker.host.trim().is_empty() {
                return Err(ConfigError::invalid("broker.host", "must not be empty"));
            }
            if self.broker.port == 0 {
                return Err(ConfigError::invalid("broker.port", "must not be zero"));
            }
            if self.broker.connect_timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    "broker.connect_timeout_ms",
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for BrokerParams {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BrokerParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("channel_prefix", &self.channel_prefix)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("io_timeout_ms", &self.io_timeout_ms)
            .finish()
    }
}

impl Default for BrokerParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            channel_prefix: "mcp_agent:".to_string(),
            connect_timeout_ms: 3000,
            io_timeout_ms: 3000,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ready_retries: 10,
            ready_backoff_ms: 500,
            poll_timeout_ms: 100,
            idle_sleep_ms: 10,
            error_backoff_ms: 500,
        }
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            broker_enabled: false,
            broker: BrokerParams::default(),
            max_history: 100,
            fanout: FanoutMode::default(),
            listener: ListenerConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние методы и функции
////////////////////////////////////////////////////////////////////////////////

fn load_error(err: ::config::ConfigError) -> ConfigError {
    ConfigError::Load {
        reason: err.to_string(),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
