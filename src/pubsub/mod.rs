//! Подсистема Publish–Subscribe (pub/sub).
//!
//! - `message`: полезная нагрузка и её проводной вид у брокера.
//! - `subscriber`: синхронные и асинхронные подписчики.
//! - `channel`: локальный канал с историей и рассылкой.
//! - `listener` (приватный): фоновая задача, читающая топик брокера.
//! - `distributed`: канал, связанный с брокером.
//! - `registry`: реестр каналов по топикам.

pub mod channel;
pub mod distributed;
mod listener;
pub mod message;
pub mod registry;
pub mod subscriber;

// Публичный экспорт типов из вложенных модулей, чтобы упростить доступ к
// ним из внешнего кода.
pub use channel::*;
pub use distributed::*;
pub use listener::{ListenerHandle, ListenerState, StopReason};
pub use message::*;
pub use registry::*;
pub use subscriber::*;
