use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, trace};
use vestnik_error::PubSubError;

use super::{AsyncSubscriber, Message, SyncSubscriber};
use crate::{config::FanoutMode, logging::log_error};

/// Итог одной рассылки.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Подписчики, завершившиеся успешно.
    pub delivered: usize,
    /// Подписчики, вернувшие ошибку или запаниковавшие.
    pub failed: usize,
}

/// Снимок счётчиков канала.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub published: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
}

/// Локальный канал: подписчики одного топика и история последних сообщений.
///
/// Изменяемое состояние живёт под `parking_lot::Mutex`, который никогда не
/// удерживается через `.await`: рассылка идёт по снимку подписчиков, поэтому
/// подписка и отписка во время `publish` не влияют на текущий проход.
#[derive(Debug)]
pub struct Channel {
    topic: String,
    max_history: usize,
    fanout: FanoutMode,
    state: Mutex<ChannelState>,
    published: AtomicU64,
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
}

#[derive(Debug, Default)]
struct ChannelState {
    subscribers: Vec<SyncSubscriber>,
    async_subscribers: Vec<AsyncSubscriber>,
    history: VecDeque<Message>,
    closed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Channel {
    /// Создаёт канал. `max_history` меньше единицы поднимается до 1.
    pub fn new(
        topic: impl Into<String>,
        max_history: usize,
        fanout: FanoutMode,
    ) -> Self {
        let max_history = max_history.max(1);
        Self {
            topic: topic.into(),
            max_history,
            fanout,
            state: Mutex::new(ChannelState {
                history: VecDeque::with_capacity(max_history),
                ..ChannelState::default()
            }),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn fanout(&self) -> FanoutMode {
        self.fanout
    }

    /// Добавляет синхронного подписчика. Возвращает `false`, если он уже
    /// подписан.
    pub fn subscribe(
        &self,
        subscriber: SyncSubscriber,
    ) -> bool {
        let mut state = self.state.lock();
        if state.subscribers.iter().any(|s| s.same(&subscriber)) {
            return false;
        }
        state.subscribers.push(subscriber);
        true
    }

    /// Удаляет синхронного подписчика. Отсутствующий подписчик не ошибка.
    pub fn unsubscribe(
        &self,
        subscriber: &SyncSubscriber,
    ) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| !s.same(subscriber));
        state.subscribers.len() != before
    }

    pub fn subscribe_async(
        &self,
        subscriber: AsyncSubscriber,
    ) -> bool {
        let mut state = self.state.lock();
        if state.async_subscribers.iter().any(|s| s.same(&subscriber)) {
            return false;
        }
        state.async_subscribers.push(subscriber);
        true
    }

    pub fn unsubscribe_async(
        &self,
        subscriber: &AsyncSubscriber,
    ) -> bool {
        let mut state = self.state.lock();
        let before = state.async_subscribers.len();
        state.async_subscribers.retain(|s| !s.same(subscriber));
        state.async_subscribers.len() != before
    }

    /// Публикует сообщение: запись в историю и рассылка всем подписчикам.
    ///
    /// Ошибки подписчиков не пробрасываются, а логируются и учитываются в
    /// [`DeliveryReport`]. Возврат происходит только после того, как каждый
    /// подписчик отработал.
    pub async fn publish(
        &self,
        message: Message,
    ) -> DeliveryReport {
        self.deliver_local(message).await
    }

    /// Локальная рассылка без участия брокера.
    ///
    /// Для обычного канала совпадает с [`Channel::publish`]; распределённый
    /// канал использует этот путь для сообщений, пришедших от брокера.
    pub async fn deliver_local(
        &self,
        message: Message,
    ) -> DeliveryReport {
        let (subscribers, async_subscribers) = {
            let mut state = self.state.lock();
            if state.closed {
                debug!(topic = %self.topic, "publish on closed channel ignored");
                return DeliveryReport::default();
            }
            state.history.push_back(message.clone());
            while state.history.len() > self.max_history {
                state.history.pop_front();
            }
            (state.subscribers.clone(), state.async_subscribers.clone())
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        trace!(
            topic = %self.topic,
            kind = message.kind(),
            sync_subscribers = subscribers.len(),
            async_subscribers = async_subscribers.len(),
            "fan-out"
        );

        let mut report = DeliveryReport::default();
        for subscriber in &subscribers {
            let result = subscriber.invoke(&message);
            self.record(&mut report, result);
        }

        match self.fanout {
            FanoutMode::Sequential => {
                for subscriber in &async_subscribers {
                    let result = subscriber.invoke(message.clone()).await;
                    self.record(&mut report, result);
                }
            }
            FanoutMode::Concurrent => {
                let mut set = JoinSet::new();
                for subscriber in async_subscribers {
                    let message = message.clone();
                    set.spawn(async move { subscriber.invoke(message).await });
                }
                while let Some(joined) = set.join_next().await {
                    let result = joined.unwrap_or_else(|e| Err(e.to_string()));
                    self.record(&mut report, result);
                }
            }
        }

        report
    }

    /// Снимок истории, от старых к новым.
    pub fn history(&self) -> Vec<Message> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Последние `n` сообщений (или меньше), от старых к новым.
    pub fn last(
        &self,
        n: usize,
    ) -> Vec<Message> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn async_subscriber_count(&self) -> usize {
        self.state.lock().async_subscribers.len()
    }

    /// Закрывает канал: дальнейшие публикации никому не доставляются и не
    /// попадают в историю. Подписчики не уведомляются.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            debug!(topic = %self.topic, "channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Внутренние методы
    ////////////////////////////////////////////////////////////////////////////

    fn record(
        &self,
        report: &mut DeliveryReport,
        result: Result<(), String>,
    ) {
        match result {
            Ok(()) => {
                report.delivered += 1;
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => {
                let err = PubSubError::SubscriberFailed {
                    topic: self.topic.clone(),
                    reason,
                };
                log_error(&err, Some(&self.topic), "subscriber failed");
                report.failed += 1;
                self.delivery_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
