/// External message broker: connector traits, in-process broker, RESP2 client.
pub mod broker;
/// Pub/sub configuration loading (defaults, file, `VESTNIK_*` environment).
pub mod config;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Pub/Sub: Channel, DistributedChannel, ChannelRegistry, Message.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Broker seams and the in-process broker.
pub use broker::{BrokerConnection, BrokerConnector, BrokerSubscription, MemoryBroker};
/// Configuration.
pub use config::{BrokerParams, FanoutMode, ListenerConfig, PubSubConfig};
/// Logging.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Channels, subscribers and messages.
pub use pubsub::{
    async_subscriber, sync_subscriber, AsyncSubscriber, Channel, ChannelHandle, ChannelRegistry,
    ChannelStats, DeliveryReport, DistributedChannel, ListenerState, Message, StopReason,
    SyncSubscriber,
};
/// Error types.
pub use vestnik_error::{BrokerError, ConfigError, ErrorExt, PubSubError, StatusCode};
#[cfg(feature = "redis-broker")]
pub use broker::RedisConnector;
