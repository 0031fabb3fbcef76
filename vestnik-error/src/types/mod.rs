pub mod broker;
pub mod config;
pub mod pubsub;

// Публичный экспорт всех типов ошибок и функций из вложенных
// модулей, чтобы упростить доступ к ним из внешнего кода.
pub use broker::*;
pub use config::*;
pub use pubsub::*;
