use std::{sync::Arc, time::Duration};

use tracing::{debug, trace};
use vestnik_error::PubSubError;

use super::{
    listener::{EchoFilter, ListenerHandle},
    Channel, DeliveryReport, ListenerState, Message,
};
use crate::{broker::BrokerConnection, config::ListenerConfig, logging::log_error};

/// Канал, связанный с топиком внешнего брокера.
///
/// Локальная часть это обычный [`Channel`]; сверху добавляются отправка
/// каждой публикации брокеру и фоновый слушатель, который доставляет
/// сообщения брокера локальным подписчикам.
pub struct DistributedChannel {
    channel: Arc<Channel>,
    broker_topic: String,
    connection: Arc<dyn BrokerConnection>,
    listener: ListenerHandle,
    echo: Arc<EchoFilter>,
}

impl DistributedChannel {
    /// Создаёт канал и запускает его слушателя.
    ///
    /// Должен вызываться внутри runtime tokio.
    pub fn new(
        channel: Channel,
        broker_topic: String,
        connection: Arc<dyn BrokerConnection>,
        listener_config: ListenerConfig,
    ) -> Self {
        let channel = Arc::new(channel);
        let echo = Arc::new(EchoFilter::default());
        let listener = ListenerHandle::spawn(
            channel.clone(),
            connection.clone(),
            broker_topic.clone(),
            listener_config,
            echo.clone(),
        );
        debug!(topic = channel.topic(), %broker_topic, "distributed channel created");

        Self {
            channel,
            broker_topic,
            connection,
            listener,
            echo,
        }
    }

    /// Локальная рассылка, затем отправка брокеру.
    ///
    /// Ошибка отправки только логируется: локальная доставка уже состоялась
    /// и не откатывается, повторной отправки нет.
    pub async fn publish(
        &self,
        message: Message,
    ) -> DeliveryReport {
        if self.channel.is_closed() {
            return self.channel.publish(message).await;
        }

        let payload = message.encode_for_broker();
        let report = self.channel.publish(message).await;

        let track_echo = self.listener.state().is_active();
        if track_echo {
            self.echo.record(&payload);
        }
        match self.connection.publish(&self.broker_topic, payload.clone()).await {
            Ok(receivers) => {
                trace!(topic = %self.broker_topic, receivers, "sent to broker");
            }
            Err(e) => {
                if track_echo {
                    self.echo.take(&payload);
                }
                let err = PubSubError::from(e);
                log_error(&err, Some(&self.broker_topic), "broker send failed");
            }
        }
        report
    }

    /// Доставка только локальным подписчикам, без брокера.
    pub async fn deliver_local(
        &self,
        message: Message,
    ) -> DeliveryReport {
        self.channel.deliver_local(message).await
    }

    pub fn topic(&self) -> &str {
        self.channel.topic()
    }

    /// Топик на стороне брокера: префикс плюс топик.
    pub fn broker_topic(&self) -> &str {
        &self.broker_topic
    }

    /// Локальная часть канала.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Ждёт, пока состояние слушателя не удовлетворит `pred`.
    pub async fn wait_for_listener<F>(
        &self,
        pred: F,
        timeout: Duration,
    ) -> Option<ListenerState>
    where
        F: Fn(&ListenerState) -> bool,
    {
        self.listener.wait_for(pred, timeout).await
    }

    /// Сигнал остановки слушателю без ожидания.
    pub fn cancel(&self) {
        self.listener.cancel();
    }

    /// Останавливает слушателя и дожидается его завершения.
    pub async fn stop(&self) -> ListenerState {
        self.listener.stop().await
    }

    /// Закрывает локальный канал и останавливает слушателя.
    pub fn close(&self) {
        self.channel.close();
        self.listener.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

impl std::fmt::Debug for DistributedChannel {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DistributedChannel")
            .field("topic", &self.channel.topic())
            .field("broker_topic", &self.broker_topic)
            .field("listener", &self.listener.state())
            .finish()
    }
}
