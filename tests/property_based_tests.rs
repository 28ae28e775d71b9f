mod common;

use std::time::Duration;

use common::strategies::*;
use proptest::prelude::*;

use courier_core::messaging::service::{Broker, InMemoryBroker};
use courier_core::messaging::{CorrelationId, QueueRouter, RoutingTable};
use courier_core::worker::BackoffPolicy;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    /// Property: routing depends only on the kind, never on payload or correlation
    #[test]
    fn routing_is_deterministic_per_kind(
        kind in task_kind_strategy(),
        payload in payload_strategy(),
        prefix in queue_prefix_strategy(),
    ) {
        let router = QueueRouter::new(RoutingTable::new(prefix.as_deref()));
        let root = router.route(kind, payload.clone(), None);
        let correlated = router.route(kind, payload, Some(CorrelationId::new()));

        prop_assert_eq!(root.target_queue(), router.queue_for(kind));
        prop_assert_eq!(correlated.target_queue(), router.queue_for(kind));
        prop_assert_eq!(router.kind_for_queue(root.target_queue()), Some(kind));
    }

    /// Property: identical correlation, kind and payload yield identical dedup keys
    #[test]
    fn dedup_key_is_stable(kind in task_kind_strategy(), payload in payload_strategy()) {
        let router = QueueRouter::default();
        let correlation = CorrelationId::new();
        let a = router.route(kind, payload.clone(), Some(correlation));
        let b = router.route(kind, payload, Some(correlation));

        prop_assert_ne!(a.envelope_id(), b.envelope_id());
        prop_assert_eq!(a.dedup_key(), b.dedup_key());
    }

    /// Property: delays never decrease with the attempt number and never exceed the ceiling
    #[test]
    fn backoff_is_monotonic_up_to_ceiling((base, multiplier, max) in backoff_params_strategy()) {
        let policy = BackoffPolicy::new(
            Duration::from_millis(base),
            multiplier,
            Duration::from_millis(max),
        );

        prop_assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(base));
        let mut previous = Duration::ZERO;
        for attempt in 1..=40 {
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay >= previous, "attempt {} shrank: {:?} < {:?}", attempt, delay, previous);
            prop_assert!(delay <= policy.max());
            previous = delay;
        }
    }

    /// Property: however many nacks precede it, an ack ends redelivery
    #[test]
    fn ack_after_nacks_never_redelivers(nacks in 0u32..8, kind in task_kind_strategy()) {
        let delivered = runtime().block_on(async {
            let broker = InMemoryBroker::new();
            let router = QueueRouter::default();
            let envelope = router.route(kind, serde_json::json!({}), None);
            let queue = envelope.target_queue().clone();
            broker.ensure_queue(&queue).await.unwrap();
            broker.publish(&queue, &envelope).await.unwrap();

            let visibility = Duration::from_secs(30);
            for _ in 0..nacks {
                let delivery = broker.receive(&queue, visibility).await.unwrap().unwrap();
                broker.nack(&delivery.handle, Duration::ZERO).await.unwrap();
            }
            let last = broker.receive(&queue, visibility).await.unwrap().unwrap();
            assert_eq!(last.envelope.attempt_count(), nacks + 1);
            broker.ack(&last.handle).await.unwrap();

            // Past any visibility timeout the message must still be gone
            tokio::time::advance(visibility * 2).await;
            broker.receive(&queue, visibility).await.unwrap().is_some()
        });
        prop_assert!(!delivered);
    }
}
