//! Конфигурация pub/sub: брокер, история каналов, слушатель.
//!
//! Значения собираются из значений по умолчанию, необязательного файла и
//! переменных окружения с префиксом `VESTNIK_` (вложенные ключи через `__`,
//! например `VESTNIK_BROKER__HOST`).

pub mod settings;

pub use settings::{BrokerParams, FanoutMode, ListenerConfig, PubSubConfig};
