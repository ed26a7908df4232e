//! Property tests for retry backoff, pool admission and reason truncation.

mod common;

use broker_session::constants::truncate_reason;
use broker_session::error::SessionError;
use broker_session::orchestration::{BrokerType, RetryPolicy};
use common::*;
use proptest::prelude::*;
use std::time::Duration;

/// Admitted = leased immediately or waiting in the queue
fn admitted_count(max_size: usize, max_queue_size: usize, callers: usize) -> (usize, usize) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async move {
        let pool = test_pool(
            pool_config(max_size, max_queue_size),
            FakeLauncher::slow(Duration::from_millis(10)),
        );
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire().await })
            })
            .collect();

        let mut rejected = 0;
        let mut leases = Vec::new();
        for handle in handles {
            let outcome = tokio::time::timeout(Duration::from_millis(50), handle).await;
            match outcome {
                Ok(Ok(Ok(lease))) => leases.push(lease),
                Ok(Ok(Err(SessionError::QueueFull { .. } | SessionError::PoolExhausted { .. }))) => rejected += 1,
                // Still queued behind a held lease
                Err(_) => {}
                Ok(other) => panic!("unexpected acquire outcome {other:?}"),
            }
        }
        let queued = pool.stats().queued;
        pool.shutdown().await;
        (leases.len() + queued, rejected)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Each retry waits twice as long as the previous one
    #[test]
    fn backoff_doubles_per_attempt(base_ms in 1u64..5_000, attempt in 1u32..12) {
        let policy = RetryPolicy::new(attempt + 1, Duration::from_millis(base_ms));
        let current = policy.delay_for_attempt(attempt);
        let next = policy.delay_for_attempt(attempt + 1);
        prop_assert_eq!(next, current * 2);
        prop_assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(base_ms));
    }

    /// Never more than P + Q concurrent acquisitions admitted
    #[test]
    fn admission_bounded_by_pool_plus_queue(max_size in 1usize..4, max_queue_size in 0usize..4, extra in 1usize..4) {
        let callers = max_size + max_queue_size + extra;
        let (admitted, rejected) = admitted_count(max_size, max_queue_size, callers);
        prop_assert_eq!(admitted, max_size + max_queue_size);
        prop_assert_eq!(rejected, extra);
    }

    /// Truncation keeps a prefix of at most `max_len` characters
    #[test]
    fn truncated_reason_is_bounded_prefix(reason in ".{0,300}", max_len in 1usize..200) {
        let truncated = truncate_reason(&reason, max_len);
        prop_assert!(truncated.chars().count() <= max_len);
        prop_assert!(reason.starts_with(&truncated));
    }

    /// Broker names normalise case and surrounding whitespace
    #[test]
    fn broker_type_normalisation_is_idempotent(name in "[A-Za-z]{1,12}", pad in " {0,3}") {
        let broker = BrokerType::new(format!("{pad}{name}{pad}"));
        prop_assert_eq!(broker.as_str(), name.to_lowercase());
        prop_assert_eq!(BrokerType::new(broker.as_str()), broker);
    }
}
