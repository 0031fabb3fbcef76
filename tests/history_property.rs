//! Property-based tests для истории канала и отчёта о доставке.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use proptest::prelude::*;
use vestnik::{sync_subscriber, Channel, FanoutMode, Message};

const PROPTEST_CASES: u32 = 256;

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    /// История хранит последние `min(n, max_history)` сообщений в порядке
    /// публикации.
    #[test]
    fn prop_history_keeps_latest(
        max_history in 1usize..20,
        payloads in prop::collection::vec("[a-z]{0,8}", 0..60),
    ) {
        let channel = Channel::new("t", max_history, FanoutMode::Sequential);
        block_on(async {
            for p in &payloads {
                channel.publish(Message::text(p.clone())).await;
            }
        });

        let expected: Vec<Message> = payloads
            .iter()
            .skip(payloads.len().saturating_sub(max_history))
            .map(|p| Message::text(p.clone()))
            .collect();
        prop_assert_eq!(channel.history(), expected);
        prop_assert!(channel.history().len() <= max_history);
        prop_assert_eq!(channel.stats().published, payloads.len() as u64);
    }

    /// `last(k)` совпадает с хвостом полной истории.
    #[test]
    fn prop_last_is_history_suffix(
        count in 0usize..40,
        k in 0usize..50,
    ) {
        let channel = Channel::new("t", 16, FanoutMode::Sequential);
        block_on(async {
            for i in 0..count {
                channel.publish(Message::text(i.to_string())).await;
            }
        });

        let history = channel.history();
        let tail = history[history.len().saturating_sub(k)..].to_vec();
        prop_assert_eq!(channel.last(k), tail);
    }

    /// Отчёт о доставке делит подписчиков на успешных и отказавших, и
    /// каждый успешный вызывается ровно один раз.
    #[test]
    fn prop_report_counts_every_subscriber(
        outcomes in prop::collection::vec(any::<bool>(), 0..12),
    ) {
        let channel = Channel::new("t", 4, FanoutMode::Sequential);
        let calls = Arc::new(AtomicUsize::new(0));
        for ok in &outcomes {
            let ok = *ok;
            let c = calls.clone();
            channel.subscribe(sync_subscriber(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                if ok {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("rejected"))
                }
            }));
        }

        let report = block_on(channel.publish(Message::from("x")));
        let successes = outcomes.iter().filter(|ok| **ok).count();
        prop_assert_eq!(report.delivered, successes);
        prop_assert_eq!(report.failed, outcomes.len() - successes);
        prop_assert_eq!(calls.load(Ordering::SeqCst), outcomes.len());
    }
}
