use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use vestnik_error::PubSubError;

use super::{
    AsyncSubscriber, Channel, DeliveryReport, DistributedChannel, ListenerState, Message,
    SyncSubscriber,
};
use crate::{
    broker::{self, BrokerConnection, BrokerConnector},
    config::PubSubConfig,
    logging::log_error,
};

/// Канал, выданный реестром.
///
/// Клон указывает на тот же экземпляр канала.
#[derive(Debug, Clone)]
pub enum ChannelHandle {
    Local(Arc<Channel>),
    Distributed(Arc<DistributedChannel>),
}

impl ChannelHandle {
    /// Публикует сообщение; для распределённого канала также отправляет его
    /// брокеру.
    pub async fn publish(
        &self,
        message: Message,
    ) -> DeliveryReport {
        match self {
            Self::Local(ch) => ch.publish(message).await,
            Self::Distributed(ch) => ch.publish(message).await,
        }
    }

    /// Локальная часть канала.
    pub fn channel(&self) -> &Arc<Channel> {
        match self {
            Self::Local(ch) => ch,
            Self::Distributed(ch) => ch.channel(),
        }
    }

    pub fn topic(&self) -> &str {
        self.channel().topic()
    }

    pub fn subscribe(
        &self,
        subscriber: SyncSubscriber,
    ) -> bool {
        self.channel().subscribe(subscriber)
    }

    pub fn unsubscribe(
        &self,
        subscriber: &SyncSubscriber,
    ) -> bool {
        self.channel().unsubscribe(subscriber)
    }

    pub fn subscribe_async(
        &self,
        subscriber: AsyncSubscriber,
    ) -> bool {
        self.channel().subscribe_async(subscriber)
    }

    pub fn unsubscribe_async(
        &self,
        subscriber: &AsyncSubscriber,
    ) -> bool {
        self.channel().unsubscribe_async(subscriber)
    }

    pub fn history(&self) -> Vec<Message> {
        self.channel().history()
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, Self::Distributed(_))
    }

    pub fn as_distributed(&self) -> Option<&Arc<DistributedChannel>> {
        match self {
            Self::Distributed(ch) => Some(ch),
            Self::Local(_) => None,
        }
    }

    /// Состояние слушателя; `None` для локального канала.
    pub fn listener_state(&self) -> Option<ListenerState> {
        self.as_distributed().map(|ch| ch.listener_state())
    }

    /// `true`, если оба дескриптора указывают на один экземпляр.
    pub fn ptr_eq(
        &self,
        other: &Self,
    ) -> bool {
        match (self, other) {
            (Self::Local(a), Self::Local(b)) => Arc::ptr_eq(a, b),
            (Self::Distributed(a), Self::Distributed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn close(&self) {
        match self {
            Self::Local(ch) => ch.close(),
            Self::Distributed(ch) => ch.close(),
        }
    }
}

/// Реестр каналов: топик → канал.
///
/// Создаётся явно и передаётся тем, кому нужен. На каждый топик в реестре
/// существует не больше одного канала; каналы создаются при первом
/// обращении. В режиме брокера реестр владеет общим соединением.
pub struct ChannelRegistry {
    channels: DashMap<String, ChannelHandle>,
    connection: Option<Arc<dyn BrokerConnection>>,
    config: PubSubConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ChannelRegistry {
    /// Реестр только локальных каналов; брокер не используется, даже если
    /// включён в конфигурации.
    pub fn local(config: PubSubConfig) -> Self {
        warn_invalid(&config);
        Self {
            channels: DashMap::new(),
            connection: None,
            config,
        }
    }

    /// Создаёт реестр с коннектором по умолчанию.
    ///
    /// Никогда не завершается ошибкой: если брокер недоступен, реестр
    /// работает в локальном режиме.
    pub async fn new(config: PubSubConfig) -> Self {
        if !config.broker_enabled {
            return Self::local(config);
        }
        match broker::default_connector() {
            Ok(connector) => Self::with_connector(config, connector.as_ref()).await,
            Err(e) => {
                let err = PubSubError::from(e);
                log_error(&err, None, "broker client unavailable, using local channels");
                Self::local(config)
            }
        }
    }

    /// Создаёт реестр, подключаясь к брокеру через `connector`.
    pub async fn with_connector(
        config: PubSubConfig,
        connector: &dyn BrokerConnector,
    ) -> Self {
        if !config.broker_enabled {
            return Self::local(config);
        }
        warn_invalid(&config);

        match connector.connect(&config.broker).await {
            Ok(connection) => {
                info!(
                    address = %config.broker.address(),
                    prefix = %config.broker.channel_prefix,
                    "connected to broker"
                );
                Self {
                    channels: DashMap::new(),
                    connection: Some(connection),
                    config,
                }
            }
            Err(e) => {
                let err = PubSubError::from(e);
                log_error(&err, None, "broker connection failed, using local channels");
                Self::local(config)
            }
        }
    }

    /// Возвращает канал топика, создавая его при первом обращении.
    ///
    /// В режиме брокера создаёт распределённый канал и запускает его
    /// слушателя, поэтому должен вызываться внутри runtime tokio.
    pub fn get_or_create(
        &self,
        topic: &str,
    ) -> ChannelHandle {
        if let Some(handle) = self.channels.get(topic) {
            return handle.value().clone();
        }
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| self.create(topic))
            .value()
            .clone()
    }

    /// Возвращает канал, не создавая его.
    pub fn get(
        &self,
        topic: &str,
    ) -> Option<ChannelHandle> {
        self.channels.get(topic).map(|h| h.value().clone())
    }

    /// Удаляет канал из реестра.
    ///
    /// Канал закрывается: публикации через оставшиеся дескрипторы никому не
    /// доставляются. Слушатель распределённого канала получает сигнал
    /// остановки.
    pub fn remove(
        &self,
        topic: &str,
    ) -> bool {
        match self.channels.remove(topic) {
            Some((_, handle)) => {
                handle.close();
                debug!(topic, "channel removed");
                true
            }
            None => false,
        }
    }

    /// Снимок списка топиков.
    pub fn list_topics(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// `true`, если реестр подключён к брокеру.
    pub fn is_distributed(&self) -> bool {
        self.connection.is_some()
    }

    pub fn channel_prefix(&self) -> &str {
        &self.config.broker.channel_prefix
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    /// Публикует в топик, создавая канал при необходимости.
    pub async fn publish(
        &self,
        topic: &str,
        message: Message,
    ) -> DeliveryReport {
        self.get_or_create(topic).publish(message).await
    }

    /// Закрывает все каналы, дожидается остановки слушателей и закрывает
    /// соединение с брокером.
    pub async fn shutdown(&self) {
        let topics = self.list_topics();
        let mut handles = Vec::with_capacity(topics.len());
        for topic in topics {
            if let Some((_, handle)) = self.channels.remove(&topic) {
                handles.push(handle);
            }
        }

        for handle in &handles {
            handle.close();
        }
        for handle in &handles {
            if let ChannelHandle::Distributed(ch) = handle {
                let state = ch.stop().await;
                debug!(topic = ch.topic(), %state, "listener joined");
            }
        }

        if let Some(connection) = &self.connection {
            if let Err(e) = connection.close().await {
                log_error(&e, None, "failed to close broker connection");
            }
        }
        info!(channels = handles.len(), "channel registry shut down");
    }

    ////////////////////////////////////////////////////////////////////////////
    // Внутренние методы
    ////////////////////////////////////////////////////////////////////////////

    fn create(
        &self,
        topic: &str,
    ) -> ChannelHandle {
        let channel = Channel::new(topic, self.config.max_history, self.config.fanout);
        match &self.connection {
            Some(connection) => {
                let broker_topic = self.config.broker.broker_topic(topic);
                ChannelHandle::Distributed(Arc::new(DistributedChannel::new(
                    channel,
                    broker_topic,
                    connection.clone(),
                    self.config.listener.clone(),
                )))
            }
            None => {
                debug!(topic, "local channel created");
                ChannelHandle::Local(Arc::new(channel))
            }
        }
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.len())
            .field("distributed", &self.is_distributed())
            .field("channel_prefix", &self.config.broker.channel_prefix)
            .finish()
    }
}

fn warn_invalid(config: &PubSubConfig) {
    if let Err(e) = config.validate() {
        log_error(&e, None, "pub/sub configuration is invalid, continuing with it");
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что повторный `get_or_create` возвращает тот же
    /// экземпляр, а после `remove` создаётся новый.
    #[tokio::test]
    async fn test_get_or_create_identity() {
        let registry = ChannelRegistry::local(PubSubConfig::default());
        let a = registry.get_or_create("t");
        let b = registry.get_or_create("t");
        assert!(a.ptr_eq(&b));
        assert!(!a.is_distributed());

        assert!(registry.remove("t"));
        assert!(!registry.remove("t"));
        let c = registry.get_or_create("t");
        assert!(!a.ptr_eq(&c));
    }

    /// Тест проверяет, что `get` не создаёт каналы.
    #[test]
    fn test_get_does_not_create() {
        let registry = ChannelRegistry::local(PubSubConfig::default());
        assert!(registry.get("t").is_none());
        assert!(registry.is_empty());
        registry.get_or_create("t");
        assert!(registry.get("t").is_some());
        assert_eq!(registry.len(), 1);
    }

    /// Тест проверяет, что удалённый канал больше не рассылает сообщения
    /// через старый дескриптор.
    #[tokio::test]
    async fn test_removed_handle_is_inert() {
        let registry = ChannelRegistry::local(PubSubConfig::default());
        let handle = registry.get_or_create("t");
        registry.remove("t");
        let report = handle.publish(Message::from("x")).await;
        assert_eq!(report, DeliveryReport::default());
        assert!(handle.history().is_empty());
    }

    /// Тест проверяет список топиков.
    #[test]
    fn test_list_topics() {
        let registry = ChannelRegistry::local(PubSubConfig::default());
        for t in ["b", "a", "c"] {
            registry.get_or_create(t);
        }
        let mut topics = registry.list_topics();
        topics.sort();
        assert_eq!(topics, vec!["a", "b", "c"]);
    }

    /// Тест проверяет, что без фичи или без брокера `new` не падает и
    /// выдаёт локальные каналы.
    #[tokio::test]
    async fn test_new_without_broker_is_local() {
        let registry = ChannelRegistry::new(PubSubConfig::default()).await;
        assert!(!registry.is_distributed());
        assert_eq!(registry.channel_prefix(), "mcp_agent:");
        registry.shutdown().await;
    }

    /// Тест проверяет, что включённый режим брокера в сборке без клиента
    /// брокера не приводит к ошибке: реестр работает локально.
    #[cfg(not(feature = "redis-broker"))]
    #[tokio::test]
    async fn test_broker_enabled_without_client_is_local() {
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        use crate::{config::BrokerParams, pubsub::sync_subscriber};

        let registry =
            ChannelRegistry::new(PubSubConfig::with_broker(BrokerParams::default())).await;
        assert!(!registry.is_distributed());

        let handle = registry.get_or_create("t");
        assert!(!handle.is_distributed());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        handle.subscribe(sync_subscriber(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let report = registry.publish("t", Message::from("x")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.history(), vec![Message::from("x")]);
        registry.shutdown().await;
    }
}
