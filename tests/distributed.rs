use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use vestnik::{
    sync_subscriber, BrokerConnection, BrokerConnector, BrokerError, BrokerParams,
    BrokerSubscription, ChannelHandle, ChannelRegistry, ListenerConfig, ListenerState,
    MemoryBroker, Message, PubSubConfig, StopReason,
};

const WAIT: Duration = Duration::from_secs(2);

fn config() -> PubSubConfig {
    PubSubConfig {
        listener: ListenerConfig {
            ready_retries: 3,
            ready_backoff_ms: 10,
            poll_timeout_ms: 20,
            idle_sleep_ms: 1,
            error_backoff_ms: 10,
        },
        ..PubSubConfig::with_broker(BrokerParams {
            channel_prefix: "p:".to_string(),
            ..BrokerParams::default()
        })
    }
}

async fn registry(broker: &MemoryBroker) -> ChannelRegistry {
    let registry = ChannelRegistry::with_connector(config(), broker).await;
    assert!(registry.is_distributed());
    registry
}

/// Канал с запущенным и готовым слушателем.
async fn ready_channel(
    registry: &ChannelRegistry,
    topic: &str,
) -> ChannelHandle {
    let handle = registry.get_or_create(topic);
    let state = handle
        .as_distributed()
        .unwrap()
        .wait_for_listener(ListenerState::is_active, WAIT)
        .await;
    assert!(state.is_some(), "listener for '{topic}' did not become active");
    handle
}

fn collector(handle: &ChannelHandle) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    handle.subscribe(sync_subscriber(move |msg| {
        s.lock().push(msg.clone());
        Ok(())
    }));
    seen
}

async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

struct FailingConnector;

#[async_trait]
impl BrokerConnector for FailingConnector {
    async fn connect(
        &self,
        params: &BrokerParams,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        Err(BrokerError::ConnectionFailed {
            address: params.address(),
            reason: "connection refused".to_string(),
        })
    }
}

/// Тест проверяет доставку между двумя реестрами за общим брокером:
/// получатель видит декодированный JSON, у издателя доставка однократная.
#[tokio::test]
async fn test_message_crosses_registries() {
    let broker = MemoryBroker::new();
    let a = registry(&broker).await;
    let b = registry(&broker).await;

    let a_handle = ready_channel(&a, "t").await;
    let b_handle = ready_channel(&b, "t").await;
    let a_seen = collector(&a_handle);
    let b_seen = collector(&b_handle);

    a.publish("t", Message::structured(json!({"type": "x"}))).await;

    eventually(|| b_seen.lock().len() == 1).await;
    assert_eq!(
        b_seen.lock()[0],
        Message::structured(json!({"type": "x"}))
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a_seen.lock().len(), 1);
    assert_eq!(b_seen.lock().len(), 1);

    a.shutdown().await;
    b.shutdown().await;
}

/// Тест проверяет проводной вид: посторонний подписчик брокера на
/// `p:t` получает компактный JSON.
#[tokio::test]
async fn test_broker_sees_prefixed_topic_and_json() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker).await;
    ready_channel(&registry, "t").await;

    let observer = broker.connection();
    let mut sub = observer.subscribe("p:t").await.unwrap();
    assert!(sub.check_ready().await.unwrap());

    registry
        .publish("t", Message::structured(json!({"type": "x"})))
        .await;
    let payload = sub.poll(WAIT).await.unwrap();
    assert_eq!(payload, Some(Bytes::from_static(br#"{"type":"x"}"#)));

    sub.unsubscribe().await.unwrap();
    registry.shutdown().await;
}

/// Тест проверяет, что текст постороннего издателя, не являющийся JSON,
/// доставляется как текст, а JSON как структура.
#[tokio::test]
async fn test_foreign_payload_decoding() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker).await;
    let handle = ready_channel(&registry, "t").await;
    let seen = collector(&handle);

    let foreign = broker.connection();
    foreign
        .publish("p:t", Bytes::from_static(b"hello"))
        .await
        .unwrap();
    foreign
        .publish("p:t", Bytes::from_static(b"[1,2]"))
        .await
        .unwrap();

    eventually(|| seen.lock().len() == 2).await;
    assert_eq!(
        *seen.lock(),
        vec![Message::from("hello"), Message::structured(json!([1, 2]))]
    );
    registry.shutdown().await;
}

/// Тест проверяет, что при неготовой подписке слушатель сдаётся, а канал
/// продолжает работать локально.
#[tokio::test]
async fn test_readiness_timeout_degrades_to_local() {
    let broker = MemoryBroker::never_ready();
    let registry = registry(&broker).await;
    let handle = registry.get_or_create("t");
    let seen = collector(&handle);

    let state = handle
        .as_distributed()
        .unwrap()
        .wait_for_listener(ListenerState::is_stopped, WAIT)
        .await;
    assert_eq!(
        state,
        Some(ListenerState::Stopped(StopReason::ReadinessTimeout))
    );
    assert_eq!(broker.subscriber_count("p:t"), 0);

    let report = handle.publish(Message::from("local")).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(*seen.lock(), vec![Message::from("local")]);
    registry.shutdown().await;
}

/// Тест проверяет, что `remove` останавливает слушателя удалённого канала.
#[tokio::test]
async fn test_remove_cancels_listener() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker).await;
    let handle = ready_channel(&registry, "t").await;
    assert_eq!(broker.subscriber_count("p:t"), 1);

    assert!(registry.remove("t"));
    let state = handle
        .as_distributed()
        .unwrap()
        .wait_for_listener(ListenerState::is_stopped, WAIT)
        .await;
    assert_eq!(state, Some(ListenerState::Stopped(StopReason::Cancelled)));
    eventually(|| broker.subscriber_count("p:t") == 0).await;
    registry.shutdown().await;
}

/// Тест проверяет, что `shutdown` останавливает всех слушателей, очищает
/// реестр и закрывает соединение.
#[tokio::test]
async fn test_shutdown_stops_everything() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker).await;
    let handles = vec![
        ready_channel(&registry, "a").await,
        ready_channel(&registry, "b").await,
    ];

    registry.shutdown().await;

    assert!(registry.is_empty());
    for handle in &handles {
        assert_eq!(
            handle.listener_state(),
            Some(ListenerState::Stopped(StopReason::Cancelled))
        );
    }
    assert_eq!(broker.subscriber_count("p:a"), 0);
    assert_eq!(broker.subscriber_count("p:b"), 0);
}

/// Тест проверяет, что отказ подключения не мешает созданию реестра:
/// каналы становятся локальными.
#[tokio::test]
async fn test_connect_failure_falls_back_to_local() {
    let registry = ChannelRegistry::with_connector(config(), &FailingConnector).await;
    assert!(!registry.is_distributed());

    let handle = registry.get_or_create("t");
    assert!(!handle.is_distributed());
    assert!(handle.listener_state().is_none());
    let seen = collector(&handle);
    registry.publish("t", Message::from("x")).await;
    assert_eq!(seen.lock().len(), 1);
}

/// Тест проверяет, что нагрузка `Bytes` уходит брокеру как UTF-8 текст и
/// приходит на другой стороне текстом.
#[tokio::test]
async fn test_bytes_payload_arrives_as_text() {
    let broker = MemoryBroker::new();
    let a = registry(&broker).await;
    let b = registry(&broker).await;
    ready_channel(&a, "t").await;
    let b_seen = collector(&ready_channel(&b, "t").await);

    a.publish("t", Message::bytes(Bytes::from_static(b"raw data")))
        .await;

    eventually(|| b_seen.lock().len() == 1).await;
    assert_eq!(b_seen.lock()[0], Message::from("raw data"));
    a.shutdown().await;
    b.shutdown().await;
}

/// Тест проверяет, что остановка прерывает незавершённое ожидание
/// готовности, не дожидаясь паузы между проверками.
#[tokio::test]
async fn test_stop_interrupts_readiness_wait() {
    let broker = MemoryBroker::never_ready();
    let config = PubSubConfig {
        listener: ListenerConfig {
            ready_retries: 10,
            ready_backoff_ms: 10_000,
            ..config().listener
        },
        ..config()
    };
    let registry = ChannelRegistry::with_connector(config, &broker).await;
    let handle = registry.get_or_create("t");
    let channel = handle.as_distributed().unwrap();

    eventually(|| broker.subscriber_count("p:t") == 1).await;
    assert!(!channel.listener_state().is_active());

    let state = tokio::time::timeout(Duration::from_secs(1), channel.stop())
        .await
        .expect("stop must not wait for the readiness backoff");
    assert_eq!(state, ListenerState::Stopped(StopReason::Cancelled));
    assert_eq!(broker.subscriber_count("p:t"), 0);
    registry.shutdown().await;
}
