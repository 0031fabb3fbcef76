use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use vestnik_error::BrokerError;

use super::{BrokerConnection, BrokerConnector, BrokerSubscription};
use crate::config::BrokerParams;

type TopicKey = Arc<str>;

/// Внутрипроцессный брокер.
///
/// Клон разделяет те же топики, поэтому несколько реестров, подключённых к
/// одному `MemoryBroker`, ведут себя как процессы за общим брокером.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    /// Топик → `Sender`
    topics: DashMap<TopicKey, broadcast::Sender<Bytes>>,
    /// Ёмкость буфера каждого `broadcast::channel`
    capacity: usize,
    never_ready: bool,
    publish_count: AtomicU64,
}

/// Соединение с [`MemoryBroker`].
pub struct MemoryConnection {
    broker: MemoryBroker,
    closed: Arc<AtomicBool>,
}

/// Подписка на топик [`MemoryBroker`].
pub struct MemorySubscription {
    topic: TopicKey,
    rx: broadcast::Receiver<Bytes>,
    broker: MemoryBroker,
    closed: Arc<AtomicBool>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Создаёт брокер с заданной ёмкостью буфера на топик.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(capacity, false)
    }

    /// Брокер, подписки которого никогда не становятся готовыми.
    pub fn never_ready() -> Self {
        Self::build(1024, true)
    }

    /// Открывает соединение без `BrokerParams`.
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            broker: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Количество активных подписок на топик.
    pub fn subscriber_count(
        &self,
        topic: &str,
    ) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Общее количество вызовов `publish`.
    pub fn publish_count(&self) -> u64 {
        self.inner.publish_count.load(Ordering::Relaxed)
    }

    /// Список топиков, на которые есть хотя бы одна подписка.
    pub fn topics(&self) -> Vec<String> {
        self.inner
            .topics
            .iter()
            .map(|entry| entry.key().to_string())
            .collect()
    }

    fn build(
        capacity: usize,
        never_ready: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: DashMap::new(),
                capacity: capacity.max(1),
                never_ready,
                publish_count: AtomicU64::new(0),
            }),
        }
    }

    fn send(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> u64 {
        self.inner.publish_count.fetch_add(1, Ordering::Relaxed);
        match self.inner.topics.get(topic) {
            // `send` возвращает ошибку, только если получателей нет.
            Some(tx) => tx.send(payload).map(|n| n as u64).unwrap_or(0),
            None => 0,
        }
    }

    fn open(
        &self,
        topic: &str,
    ) -> broadcast::Receiver<Bytes> {
        self.inner
            .topics
            .entry(Arc::from(topic))
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }

    /// Удаляет топик, если подписчиков на нём не осталось.
    fn release(
        &self,
        topic: &str,
    ) {
        self.inner
            .topics
            .remove_if(topic, |_, tx| tx.receiver_count() == 0);
    }
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализации трейтов брокера
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(
        &self,
        _params: &BrokerParams,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        Ok(Arc::new(self.connection()))
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<u64, BrokerError> {
        self.ensure_open()?;
        Ok(self.broker.send(topic, payload))
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        self.ensure_open()?;
        let rx = self.broker.open(topic);
        debug!(topic, "memory broker subscription opened");
        Ok(Box::new(MemorySubscription {
            topic: Arc::from(topic),
            rx,
            broker: self.broker.clone(),
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn check_ready(&mut self) -> Result<bool, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(!self.broker.inner.never_ready)
    }

    async fn poll(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Bytes>, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(topic = %self.topic, skipped, "memory subscription lagged");
                Err(BrokerError::Lagged { skipped })
            }
            Ok(Err(RecvError::Closed)) => Err(BrokerError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), BrokerError> {
        let Self {
            topic, rx, broker, ..
        } = *self;
        drop(rx);
        broker.release(&topic);
        debug!(topic = %topic, "memory broker subscription closed");
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("topics", &self.inner.topics.len())
            .field("capacity", &self.inner.capacity)
            .field("never_ready", &self.inner.never_ready)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(50);

    /// Тест проверяет, что подписчик получает опубликованное сообщение, а
    /// `publish` возвращает число получателей.
    #[tokio::test]
    async fn test_publish_and_poll() {
        let broker = MemoryBroker::new();
        let conn = broker.connection();
        let mut sub = conn.subscribe("p:t").await.unwrap();
        assert!(sub.check_ready().await.unwrap());

        let n = conn.publish("p:t", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(sub.poll(POLL).await.unwrap(), Some(Bytes::from_static(b"hi")));
        assert_eq!(sub.poll(POLL).await.unwrap(), None);
    }

    /// Тест проверяет, что публикация без подписчиков не ошибка.
    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = MemoryBroker::new();
        let conn = broker.connection();
        assert_eq!(conn.publish("nobody", Bytes::from_static(b"x")).await, Ok(0));
        assert_eq!(broker.publish_count(), 1);
    }

    /// Тест проверяет, что отписка освобождает топик.
    #[tokio::test]
    async fn test_unsubscribe_releases_topic() {
        let broker = MemoryBroker::new();
        let conn = broker.connection();
        let sub = conn.subscribe("t").await.unwrap();
        assert_eq!(broker.subscriber_count("t"), 1);
        sub.unsubscribe().await.unwrap();
        assert_eq!(broker.subscriber_count("t"), 0);
        assert!(broker.topics().is_empty());
    }

    /// Тест проверяет, что закрытое соединение отклоняет операции, а его
    /// подписки сообщают о закрытии.
    #[tokio::test]
    async fn test_closed_connection() {
        let broker = MemoryBroker::new();
        let conn = broker.connection();
        let mut sub = conn.subscribe("t").await.unwrap();
        conn.close().await.unwrap();

        assert_eq!(
            conn.publish("t", Bytes::from_static(b"x")).await,
            Err(BrokerError::Closed)
        );
        assert!(conn.subscribe("t").await.is_err());
        assert_eq!(sub.poll(POLL).await, Err(BrokerError::Closed));
    }

    /// Тест проверяет тестовый режим `never_ready`.
    #[tokio::test]
    async fn test_never_ready() {
        let broker = MemoryBroker::never_ready();
        let mut sub = broker.connection().subscribe("t").await.unwrap();
        assert_eq!(sub.check_ready().await, Ok(false));
    }

    /// Тест проверяет, что переполнение буфера сообщается как потеря
    /// сообщений, а подписка продолжает работать.
    #[tokio::test]
    async fn test_lagged_subscription_continues() {
        let broker = MemoryBroker::with_capacity(1);
        let conn = broker.connection();
        let mut sub = conn.subscribe("t").await.unwrap();
        for i in 0..3u8 {
            conn.publish("t", Bytes::from(vec![i])).await.unwrap();
        }
        assert_eq!(
            sub.poll(POLL).await,
            Err(BrokerError::Lagged { skipped: 2 })
        );
        assert_eq!(sub.poll(POLL).await.unwrap(), Some(Bytes::from(vec![2u8])));
    }
}
