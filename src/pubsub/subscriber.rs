use std::{
    any::Any,
    fmt,
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use super::Message;

/// Упакованная `Send`-future, которую возвращает асинхронный подписчик.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type SyncFn = dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync;
type AsyncFn = dyn Fn(Message) -> BoxFuture<anyhow::Result<()>> + Send + Sync;

/// Синхронный подписчик канала.
///
/// Вызывается прямо внутри `publish` и не должен заметно блокировать.
/// Идентичность подписчика задаёт общий `Arc`: клон того же значения
/// считается тем же подписчиком, повторная подписка ничего не меняет.
#[derive(Clone)]
pub struct SyncSubscriber(Arc<SyncFn>);

/// Асинхронный подписчик канала.
///
/// `publish` дожидается завершения возвращённой future. Идентичность
/// определяется так же, как у [`SyncSubscriber`].
#[derive(Clone)]
pub struct AsyncSubscriber(Arc<AsyncFn>);

impl SyncSubscriber {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Проверяет, что оба значения указывают на одного подписчика.
    pub fn same(
        &self,
        other: &Self,
    ) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Вызывает подписчика; ошибка и паника превращаются в `Err(reason)`.
    pub(crate) fn invoke(
        &self,
        message: &Message,
    ) -> Result<(), String> {
        match catch_unwind(AssertUnwindSafe(|| (self.0)(message))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => Err(panic_reason(panic)),
        }
    }
}

impl AsyncSubscriber {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |msg| Box::pin(f(msg))))
    }

    /// Проверяет, что оба значения указывают на одного подписчика.
    pub fn same(
        &self,
        other: &Self,
    ) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Запускает подписчика и ждёт его завершения; паника внутри future
    /// (или при её создании) перехватывается.
    pub(crate) async fn invoke(
        &self,
        message: Message,
    ) -> Result<(), String> {
        let fut = match catch_unwind(AssertUnwindSafe(|| (self.0)(message))) {
            Ok(fut) => fut,
            Err(panic) => return Err(panic_reason(panic)),
        };
        match (CatchUnwind { inner: fut }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => Err(panic_reason(panic)),
        }
    }
}

/// Создаёт синхронного подписчика из замыкания.
pub fn sync_subscriber<F>(f: F) -> SyncSubscriber
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    SyncSubscriber::new(f)
}

/// Создаёт асинхронного подписчика из замыкания, возвращающего future.
pub fn async_subscriber<F, Fut>(f: F) -> AsyncSubscriber
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    AsyncSubscriber::new(f)
}

impl fmt::Debug for SyncSubscriber {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "SyncSubscriber({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

impl fmt::Debug for AsyncSubscriber {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "AsyncSubscriber({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние методы и функции
////////////////////////////////////////////////////////////////////////////////

/// Future-обёртка, перехватывающая панику при каждом `poll`.
struct CatchUnwind {
    inner: BoxFuture<anyhow::Result<()>>,
}

impl Future for CatchUnwind {
    type Output = Result<anyhow::Result<()>, Box<dyn Any + Send>>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let inner = &mut self.inner;
        match catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(res)) => Poll::Ready(Ok(res)),
            Err(panic) => Poll::Ready(Err(panic)),
        }
    }
}

fn panic_reason(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
