use std::{collections::VecDeque, fmt, future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};
use vestnik_error::{BrokerError, PubSubError};

use super::{Channel, Message};
use crate::{
    broker::{BrokerConnection, BrokerSubscription},
    config::ListenerConfig,
    logging::log_error,
};

/// Предел числа собственных публикаций, ожидающих возврата от брокера.
const ECHO_CAPACITY: usize = 1024;

/// Причина остановки слушателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Остановлен владельцем (удаление канала, завершение реестра).
    Cancelled,
    /// Подписка не стала готовой за отведённое число попыток.
    ReadinessTimeout,
    /// Брокер отказал в подписке.
    SubscribeFailed,
    /// Общее соединение с брокером закрыто.
    BrokerClosed,
}

/// Состояние фоновой задачи слушателя.
///
/// `Created → Subscribing → Ready → Listening → Stopped(_)`; из любого
/// состояния возможен переход сразу в `Stopped`. После обрыва подписки
/// слушатель возвращается из `Listening` в `Subscribing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Subscribing,
    Ready,
    Listening,
    Stopped(StopReason),
}

impl ListenerState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }

    /// `true`, когда подписка подтверждена брокером.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Ready | Self::Listening)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Subscribing => f.write_str("subscribing"),
            Self::Ready => f.write_str("ready"),
            Self::Listening => f.write_str("listening"),
            Self::Stopped(reason) => write!(f, "stopped ({reason:?})"),
        }
    }
}

/// Полезные нагрузки, которые канал сам отправил брокеру и которые ещё не
/// вернулись через подписку.
#[derive(Debug, Default)]
pub(crate) struct EchoFilter {
    inflight: Mutex<VecDeque<Bytes>>,
}

impl EchoFilter {
    pub(crate) fn record(
        &self,
        payload: &Bytes,
    ) {
        let mut inflight = self.inflight.lock();
        if inflight.len() == ECHO_CAPACITY {
            inflight.pop_front();
        }
        inflight.push_back(payload.clone());
    }

    /// Удаляет одну совпадающую запись. `true`, если она была.
    pub(crate) fn take(
        &self,
        payload: &[u8],
    ) -> bool {
        let mut inflight = self.inflight.lock();
        match inflight.iter().position(|p| p.as_ref() == payload) {
            Some(idx) => {
                inflight.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        self.inflight.lock().clear();
    }
}

/// Управление фоновой задачей, читающей топик брокера.
///
/// Ровно одна задача на распределённый канал. Остановка проверяется в каждой
/// точке приостановки задачи.
#[derive(Debug)]
pub struct ListenerHandle {
    state: watch::Receiver<ListenerState>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ListenerHandle {
    /// Запускает слушателя. Должен вызываться внутри runtime tokio.
    pub(crate) fn spawn(
        channel: Arc<Channel>,
        connection: Arc<dyn BrokerConnection>,
        broker_topic: String,
        config: ListenerConfig,
        echo: Arc<EchoFilter>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ListenerState::Created);
        let (stop_tx, stop_rx) = watch::channel(false);

        let listener = Listener {
            channel,
            connection,
            broker_topic,
            config,
            echo,
            state: state_tx,
            stop: stop_rx,
        };
        let task = tokio::spawn(listener.run());

        Self {
            state: state_rx,
            stop: stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Текущее состояние.
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Приёмник для наблюдения за сменой состояний.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    /// Ждёт состояния, удовлетворяющего `pred`, не дольше `timeout`.
    ///
    /// Возвращает достигнутое состояние или `None` по таймауту.
    pub async fn wait_for<F>(
        &self,
        pred: F,
        timeout: Duration,
    ) -> Option<ListenerState>
    where
        F: Fn(&ListenerState) -> bool,
    {
        let mut rx = self.state.clone();
        let reached = match tokio::time::timeout(timeout, rx.wait_for(|s| pred(s))).await {
            Ok(Ok(state)) => Some(*state),
            Ok(Err(_)) => None,
            Err(_) => return None,
        };
        // Отправитель удалён вместе с задачей: последнее состояние финальное.
        reached.or_else(|| {
            let state = *rx.borrow();
            pred(&state).then_some(state)
        })
    }

    /// Посылает сигнал остановки, не дожидаясь задачи.
    pub fn cancel(&self) {
        self.stop.send_replace(true);
    }

    /// Останавливает задачу и дожидается её завершения.
    pub async fn stop(&self) -> ListenerState {
        self.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "listener task failed");
            }
        }
        self.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние методы и функции
////////////////////////////////////////////////////////////////////////////////

struct Listener {
    channel: Arc<Channel>,
    connection: Arc<dyn BrokerConnection>,
    broker_topic: String,
    config: ListenerConfig,
    echo: Arc<EchoFilter>,
    state: watch::Sender<ListenerState>,
    stop: watch::Receiver<bool>,
}

/// Итог шага, который может быть прерван остановкой.
enum Step<T> {
    Done(T),
    Stopped,
}

/// Чем закончилась одна подписка на топик.
enum Session {
    Stop(StopReason),
    /// Подписка оборвалась, нужна новая.
    Lost,
}

impl Listener {
    async fn run(mut self) {
        let reason = self.listen().await;
        self.echo.clear();
        match reason {
            StopReason::Cancelled => {
                debug!(topic = %self.broker_topic, "listener cancelled")
            }
            reason => warn!(topic = %self.broker_topic, ?reason, "listener stopped"),
        }
        self.set(ListenerState::Stopped(reason));
    }

    /// Подписывается, слушает и переподписывается после обрыва, пока не
    /// придёт остановка или не закроется само соединение.
    async fn listen(&mut self) -> StopReason {
        let mut resubscribing = false;
        loop {
            self.set(ListenerState::Subscribing);
            if resubscribing {
                // Эхо прежней подписки уже не придёт.
                self.echo.clear();
                if !pause(&mut self.stop, self.config.error_backoff()).await {
                    return StopReason::Cancelled;
                }
            }

            let connection = self.connection.clone();
            let subscribing = connection.subscribe(&self.broker_topic);
            let subscribed = match race(&mut self.stop, subscribing).await {
                Step::Done(res) => res,
                Step::Stopped => return StopReason::Cancelled,
            };
            let mut subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(e) if e.is_fatal() => {
                    log_error(&e, Some(&self.broker_topic), "broker connection closed");
                    return StopReason::BrokerClosed;
                }
                Err(e) if !resubscribing => {
                    log_error(&e, Some(&self.broker_topic), "broker subscribe failed");
                    return StopReason::SubscribeFailed;
                }
                Err(e) => {
                    log_error(&e, Some(&self.broker_topic), "broker resubscribe failed");
                    continue;
                }
            };

            let session = match self.await_ready(subscription.as_mut(), resubscribing).await {
                Ok(()) => {
                    self.set(ListenerState::Ready);
                    info!(
                        topic = %self.broker_topic,
                        resubscribed = resubscribing,
                        "listener ready"
                    );
                    self.set(ListenerState::Listening);
                    self.consume(subscription.as_mut()).await
                }
                Err(session) => session,
            };

            if let Err(e) = subscription.unsubscribe().await {
                debug!(topic = %self.broker_topic, error = %e, "unsubscribe failed");
            }
            match session {
                Session::Stop(reason) => return reason,
                Session::Lost => resubscribing = true,
            }
        }
    }

    /// Ограниченное ожидание готовности подписки.
    ///
    /// Исчерпание попыток останавливает слушателя только для первой
    /// подписки; при переподписке оно считается обрывом.
    async fn await_ready(
        &mut self,
        subscription: &mut dyn BrokerSubscription,
        resubscribing: bool,
    ) -> Result<(), Session> {
        let attempts = self.config.ready_retries;
        for attempt in 1..=attempts {
            match race(&mut self.stop, subscription.check_ready()).await {
                Step::Stopped => return Err(Session::Stop(StopReason::Cancelled)),
                Step::Done(Ok(true)) => return Ok(()),
                Step::Done(Ok(false)) => {
                    trace!(topic = %self.broker_topic, attempt, "subscription not ready yet");
                }
                Step::Done(Err(e)) if e.is_fatal() => {
                    let topic = Some(self.broker_topic.as_str());
                    log_error(&e, topic, "subscription lost during readiness wait");
                    return Err(Session::Lost);
                }
                Step::Done(Err(e)) => {
                    log_error(&e, Some(&self.broker_topic), "readiness check failed");
                }
            }
            if attempt < attempts && !pause(&mut self.stop, self.config.ready_backoff()).await {
                return Err(Session::Stop(StopReason::Cancelled));
            }
        }

        let err = PubSubError::ListenerInitTimeout {
            topic: self.broker_topic.clone(),
            attempts,
        };
        if resubscribing {
            log_error(&err, Some(&self.broker_topic), "resubscription not ready, retrying");
            Err(Session::Lost)
        } else {
            log_error(&err, Some(&self.broker_topic), "giving up on broker subscription");
            Err(Session::Stop(StopReason::ReadinessTimeout))
        }
    }

    /// Основной цикл: сообщения брокера идут только в локальную рассылку.
    ///
    /// Ошибки опроса логируются, цикл продолжается. Обрыв подписки
    /// возвращает [`Session::Lost`].
    async fn consume(
        &mut self,
        subscription: &mut dyn BrokerSubscription,
    ) -> Session {
        let poll_timeout = self.config.poll_timeout();
        loop {
            let polled = match race(&mut self.stop, subscription.poll(poll_timeout)).await {
                Step::Done(res) => res,
                Step::Stopped => return Session::Stop(StopReason::Cancelled),
            };

            match polled {
                Ok(Some(payload)) => {
                    if self.echo.take(&payload) {
                        trace!(topic = %self.broker_topic, "own publication skipped");
                        continue;
                    }
                    let message = Message::decode_from_broker(&payload);
                    trace!(topic = %self.broker_topic, kind = message.kind(), "broker message");
                    self.channel.deliver_local(message).await;
                }
                Ok(None) => {
                    if !pause(&mut self.stop, self.config.idle_sleep()).await {
                        return Session::Stop(StopReason::Cancelled);
                    }
                }
                Err(e @ BrokerError::Lagged { .. }) => {
                    // Эхо пропущенных сообщений уже не придёт.
                    self.echo.clear();
                    log_error(&e, Some(&self.broker_topic), "broker messages lost");
                }
                Err(e) if e.is_fatal() => {
                    let topic = Some(self.broker_topic.as_str());
                    log_error(&e, topic, "broker subscription lost, resubscribing");
                    return Session::Lost;
                }
                Err(e) => {
                    log_error(&e, Some(&self.broker_topic), "broker poll failed");
                    if !pause(&mut self.stop, self.config.error_backoff()).await {
                        return Session::Stop(StopReason::Cancelled);
                    }
                }
            }
        }
    }

    fn set(
        &self,
        state: ListenerState,
    ) {
        self.state.send_replace(state);
    }
}

/// Выполняет `fut`, если раньше не пришёл сигнал остановки.
async fn race<F: Future>(
    stop: &mut watch::Receiver<bool>,
    fut: F,
) -> Step<F::Output> {
    if *stop.borrow() {
        return Step::Stopped;
    }
    tokio::select! {
        biased;
        _ = stop_signal(stop) => Step::Stopped,
        out = fut => Step::Done(out),
    }
}

/// Пауза с учётом остановки. `false`, если слушатель остановлен.
async fn pause(
    stop: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    matches!(
        race(stop, tokio::time::sleep(duration)).await,
        Step::Done(())
    )
}

/// Завершается, когда поднят флаг остановки или удалён его отправитель.
async fn stop_signal(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
