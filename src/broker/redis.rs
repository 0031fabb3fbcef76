use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
    time::timeout,
};
use tracing::{debug, trace, warn};
use vestnik_error::BrokerError;

use super::{
    resp::{self, RespFrame},
    BrokerConnection, BrokerConnector, BrokerSubscription,
};
use crate::config::BrokerParams;

/// Сколько `check_ready` ждёт подтверждения подписки за один вызов.
const READY_WAIT: Duration = Duration::from_millis(100);

/// Коннектор к Redis-совместимому брокеру по RESP2.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

/// Общее соединение: одно командное TCP-соединение для `PUBLISH`.
///
/// Каждая подписка открывает своё соединение, так как в режиме
/// подписки сервер принимает только команды подписки.
pub struct RedisConnection {
    params: BrokerParams,
    command: Mutex<Option<RespStream>>,
    closed: AtomicBool,
}

/// Подписка на один канал брокера на выделенном соединении.
pub struct RedisSubscription {
    topic: String,
    stream: RespStream,
    ready: bool,
    /// Сообщения, прочитанные во время ожидания подтверждения.
    pending: VecDeque<Bytes>,
    closed: bool,
}

/// TCP-поток с буфером чтения для фреймов RESP.
struct RespStream {
    stream: TcpStream,
    buf: BytesMut,
    io_timeout: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RespStream {
    /// Подключается и выполняет `AUTH`/`SELECT` при необходимости.
    async fn open(params: &BrokerParams) -> Result<Self, BrokerError> {
        let address = params.address();
        debug!(%address, "connecting to broker");

        let stream = timeout(params.connect_timeout(), TcpStream::connect(address.as_str()))
            .await
            .map_err(|_| BrokerError::ConnectionTimeout {
                address: address.clone(),
            })?
            .map_err(|e| BrokerError::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        // Ошибка TCP_NODELAY не мешает работе соединения.
        let _ = stream.set_nodelay(true);

        let mut conn = Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            io_timeout: params.io_timeout(),
        };

        if let Some(password) = params.password.as_deref() {
            conn.expect_ok(&[b"AUTH".as_slice(), password.as_bytes()])
                .await?;
        }
        if params.db != 0 {
            let db = params.db.to_string();
            conn.expect_ok(&[b"SELECT".as_slice(), db.as_bytes()])
                .await?;
        }

        debug!(%address, db = params.db, "broker connection established");
        Ok(conn)
    }

    async fn send(
        &mut self,
        args: &[&[u8]],
    ) -> Result<(), BrokerError> {
        let encoded = resp::encode_command(args);
        timeout(self.io_timeout, self.stream.write_all(&encoded))
            .await
            .map_err(|_| BrokerError::Timeout)??;
        Ok(())
    }

    /// Читает следующий фрейм. Отмена безопасна: прочитанные байты остаются
    /// в буфере.
    async fn read_frame(&mut self) -> Result<RespFrame, BrokerError> {
        loop {
            if let Some(frame) = resp::decode(&mut self.buf)? {
                trace!(?frame, "frame received");
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(BrokerError::Closed);
            }
        }
    }

    /// Ждёт фрейм не дольше `wait`; `Ok(None)` при истечении времени.
    async fn read_frame_within(
        &mut self,
        wait: Duration,
    ) -> Result<Option<RespFrame>, BrokerError> {
        match timeout(wait, self.read_frame()).await {
            Ok(frame) => frame.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Команда с ответом в пределах `io_timeout`.
    async fn request(
        &mut self,
        args: &[&[u8]],
    ) -> Result<RespFrame, BrokerError> {
        self.send(args).await?;
        match self.read_frame_within(self.io_timeout).await? {
            Some(RespFrame::Error(message)) => Err(BrokerError::Server { message }),
            Some(frame) => Ok(frame),
            None => Err(BrokerError::Timeout),
        }
    }

    async fn expect_ok(
        &mut self,
        args: &[&[u8]],
    ) -> Result<(), BrokerError> {
        match self.request(args).await? {
            RespFrame::Simple(s) if s == "OK" => Ok(()),
            other => Err(BrokerError::protocol(format!("expected +OK, got {other:?}"))),
        }
    }

    async fn shutdown(mut self) {
        // Соединение закрывается в любом случае при drop.
        let _ = self.stream.shutdown().await;
    }
}

impl RedisConnection {
    /// Открывает командное соединение.
    pub async fn connect(params: &BrokerParams) -> Result<Self, BrokerError> {
        let stream = RespStream::open(params).await?;
        Ok(Self {
            params: params.clone(),
            command: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

impl RedisSubscription {
    /// Разбирает push-фрейм режима подписки.
    fn handle_push(
        &mut self,
        frame: RespFrame,
    ) -> Result<Option<Bytes>, BrokerError> {
        let items = match frame {
            RespFrame::Array(Some(items)) => items,
            RespFrame::Error(message) => return Err(BrokerError::Server { message }),
            other => {
                return Err(BrokerError::protocol(format!(
                    "unexpected frame in subscription: {other:?}"
                )))
            }
        };

        let kind = items
            .first()
            .and_then(RespFrame::as_bytes)
            .map(|b| String::from_utf8_lossy(b).to_ascii_lowercase())
            .unwrap_or_default();
        match (kind.as_str(), items.len()) {
            ("message", 3) => match items.into_iter().nth(2) {
                Some(RespFrame::Bulk(Some(payload))) => Ok(Some(payload)),
                other => Err(BrokerError::protocol(format!(
                    "message payload is not a bulk string: {other:?}"
                ))),
            },
            ("subscribe", 3) => {
                self.ready = true;
                debug!(topic = %self.topic, "subscription confirmed");
                Ok(None)
            }
            ("unsubscribe", _) | ("pong", _) => Ok(None),
            _ => {
                warn!(topic = %self.topic, ?items, "ignoring unknown push frame");
                Ok(None)
            }
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Ошибка чтения оставляет поток в неизвестной позиции: подписка
    /// закрывается, чтобы слушатель открыл новую.
    fn broken(
        &mut self,
        err: BrokerError,
    ) -> BrokerError {
        if !err.is_fatal() {
            warn!(topic = %self.topic, error = %err, "subscription stream unusable");
        }
        self.closed = true;
        BrokerError::Closed
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализации трейтов брокера
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl BrokerConnector for RedisConnector {
    async fn connect(
        &self,
        params: &BrokerParams,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        Ok(Arc::new(RedisConnection::connect(params).await?))
    }
}

#[async_trait]
impl BrokerConnection for RedisConnection {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<u64, BrokerError> {
        self.ensure_open()?;
        let mut guard = self.command.lock().await;
        if guard.is_none() {
            *guard = Some(RespStream::open(&self.params).await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(BrokerError::Closed);
        };

        let result = stream
            .request(&[b"PUBLISH".as_slice(), topic.as_bytes(), &payload[..]])
            .await;
        match result {
            Ok(RespFrame::Integer(n)) => Ok(n.max(0) as u64),
            Ok(other) => Err(BrokerError::protocol(format!(
                "unexpected PUBLISH reply: {other:?}"
            ))),
            Err(e) => {
                // После сетевой ошибки поток мог остаться посреди фрейма,
                // следующая публикация откроет новое соединение.
                if !matches!(e, BrokerError::Server { .. }) {
                    *guard = None;
                }
                Err(e)
            }
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        self.ensure_open()?;
        let opened = async {
            let mut stream = RespStream::open(&self.params).await?;
            stream
                .send(&[b"SUBSCRIBE".as_slice(), topic.as_bytes()])
                .await?;
            Ok::<_, BrokerError>(stream)
        };
        // `Closed` зарезервирован за закрытым общим соединением; обрыв
        // нового потока это неудачное подключение.
        let stream = opened.await.map_err(|e| match e {
            BrokerError::Closed => BrokerError::ConnectionFailed {
                address: self.params.address(),
                reason: "connection closed by broker".to_string(),
            },
            e => e,
        })?;
        Ok(Box::new(RedisSubscription {
            topic: topic.to_string(),
            stream,
            ready: false,
            pending: VecDeque::new(),
            closed: false,
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        if let Some(stream) = self.command.lock().await.take() {
            stream.shutdown().await;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerSubscription for RedisSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn check_ready(&mut self) -> Result<bool, BrokerError> {
        self.ensure_open()?;
        if self.ready {
            return Ok(true);
        }
        let frame = match self.stream.read_frame_within(READY_WAIT).await {
            Ok(frame) => frame,
            Err(e) => return Err(self.broken(e)),
        };
        if let Some(frame) = frame {
            if let Some(payload) = self.handle_push(frame)? {
                self.pending.push_back(payload);
                self.ready = true;
            }
        }
        Ok(self.ready)
    }

    async fn poll(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Bytes>, BrokerError> {
        self.ensure_open()?;
        if let Some(payload) = self.pending.pop_front() {
            return Ok(Some(payload));
        }
        match self.stream.read_frame_within(timeout).await {
            Ok(Some(frame)) => self.handle_push(frame),
            Ok(None) => Ok(None),
            Err(e) => Err(self.broken(e)),
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), BrokerError> {
        let Self {
            topic, mut stream, ..
        } = *self;
        let sent = stream
            .send(&[b"UNSUBSCRIBE".as_slice(), topic.as_bytes()])
            .await;
        stream.shutdown().await;
        debug!(%topic, "broker subscription closed");
        sent
    }
}
