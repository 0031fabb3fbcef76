//! Внешний брокер сообщений, к которому подключаются распределённые каналы.
//!
//! - `memory`: внутрипроцессный брокер на `tokio::sync::broadcast`,
//!   позволяющий нескольким реестрам в одном процессе делить топики.
//! - `resp`: кодек RESP2.
//! - `redis` (фича `redis-broker`): клиент Redis-совместимого брокера.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use vestnik_error::BrokerError;

use crate::config::BrokerParams;

pub mod memory;
pub mod resp;

#[cfg(feature = "redis-broker")]
pub mod redis;

pub use memory::MemoryBroker;
#[cfg(feature = "redis-broker")]
pub use redis::RedisConnector;

/// Фабрика соединений с брокером.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(
        &self,
        params: &BrokerParams,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// Общее соединение с брокером.
///
/// Должно выдерживать одновременные `publish` и `subscribe` из разных задач.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Публикует полезную нагрузку. Возвращает число получателей, которое
    /// сообщил брокер.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<u64, BrokerError>;

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<Box<dyn BrokerSubscription>, BrokerError>;

    /// Закрывает соединение; последующие вызовы возвращают
    /// [`BrokerError::Closed`].
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Подписка на один топик брокера.
#[async_trait]
pub trait BrokerSubscription: Send {
    fn topic(&self) -> &str;

    /// `true`, когда брокер подтвердил подписку.
    async fn check_ready(&mut self) -> Result<bool, BrokerError>;

    /// Ждёт следующее сообщение не дольше `timeout`.
    async fn poll(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Bytes>, BrokerError>;

    async fn unsubscribe(self: Box<Self>) -> Result<(), BrokerError>;
}

/// Коннектор по умолчанию для этой сборки.
pub fn default_connector() -> Result<Box<dyn BrokerConnector>, BrokerError> {
    #[cfg(feature = "redis-broker")]
    {
        Ok(Box::new(RedisConnector))
    }
    #[cfg(not(feature = "redis-broker"))]
    {
        Err(BrokerError::Unavailable {
            reason: "built without the `redis-broker` feature".to_string(),
        })
    }
}
