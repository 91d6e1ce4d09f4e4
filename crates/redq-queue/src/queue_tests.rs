
    use super::*;
    use crate::clock::MutableClock;
    use crate::store::MemoryStore;
    use serde_json::json;

    struct Fixture {
        queue: MessageQueue,
        store: Arc<MemoryStore>,
        clock: Arc<MutableClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(MutableClock::new(1_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let queue = MessageQueue::builder(store.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        Fixture { queue, store, clock }
    }

    fn bake(version: &str) -> Message {
        Message::new("bake", json!({ "version": version }))
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = MessageQueue::builder(Arc::new(MemoryStore::new()))
            .config(QueueConfig::default().with_max_attempts(0))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_push_stores_body_and_schedules() {
        let f = fixture();
        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();

        let keys = f.queue.keys();
        let fp = Fingerprint::of(&bake("v1")).unwrap().latest;
        assert_eq!(f.store.zscore(&keys.ready, &fp).await.unwrap(), Some(1_000_000.0));
        assert_eq!(f.store.hget(&keys.attempts, &fp).await.unwrap(), Some("1".to_string()));
        let body = f.store.hget(&keys.messages, &fp).await.unwrap().unwrap();
        assert_eq!(Message::from_json(&body).unwrap(), bake("v1"));
    }

    #[tokio::test]
    async fn test_push_duplicate_only_moves_score() {
        let f = fixture();
        f.queue.push(&bake("v1"), Duration::from_secs(60)).await.unwrap();
        f.queue
            .push(&bake("v1").with_label("source", "second"), Duration::ZERO)
            .await
            .unwrap();

        let state = f.queue.read_state().await.unwrap();
        assert_eq!(state.depth, 1);
        assert_eq!(state.ready, 1);
        assert_eq!(f.store.hlen(&f.queue.keys().messages).await.unwrap(), 1);

        // First body kept.
        let fp = Fingerprint::of(&bake("v1")).unwrap().latest;
        let body = f.store.hget(&f.queue.keys().messages, &fp).await.unwrap().unwrap();
        assert!(Message::from_json(&body).unwrap().attributes.labels.is_empty());
    }

    #[tokio::test]
    async fn test_push_matches_legacy_fingerprint() {
        let f = fixture();
        let fp = Fingerprint::of(&bake("v1")).unwrap();
        let legacy = fp.all.iter().find(|h| **h != fp.latest).unwrap().clone();

        let keys = f.queue.keys();
        f.store.zadd(&keys.ready, &legacy, 5_000_000.0).await.unwrap();
        f.store
            .hset(&keys.messages, &legacy, &bake("v1").to_json().unwrap())
            .await
            .unwrap();

        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();

        assert_eq!(f.store.zcard(&keys.ready).await.unwrap(), 1);
        assert_eq!(f.store.zscore(&keys.ready, &legacy).await.unwrap(), Some(1_000_000.0));
    }

    #[tokio::test]
    async fn test_push_delay_defers_readiness() {
        let f = fixture();
        f.queue.push(&bake("v1"), Duration::from_secs(30)).await.unwrap();

        let state = f.queue.read_state().await.unwrap();
        assert_eq!(state.depth, 1);
        assert_eq!(state.ready, 0);

        f.clock.advance(Duration::from_secs(30));
        assert_eq!(f.queue.read_state().await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let f = fixture();
        assert!(f.queue.ensure(&bake("v1"), Duration::ZERO).await.unwrap());
        assert!(!f.queue.ensure(&bake("v1"), Duration::from_secs(60)).await.unwrap());

        // Still due now: ensure does not re-prioritize.
        assert_eq!(f.queue.read_state().await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_ensure_skips_in_flight() {
        let f = fixture();
        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();
        let _delivery = f.queue.poll().await.unwrap().unwrap();

        assert!(!f.queue.ensure(&bake("v1"), Duration::ZERO).await.unwrap());
        assert_eq!(f.queue.read_state().await.unwrap().depth, 0);
    }

    #[tokio::test]
    async fn test_reschedule() {
        let f = fixture();
        assert!(!f.queue.reschedule(&bake("v1"), Duration::ZERO).await.unwrap());

        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();
        assert!(f.queue.reschedule(&bake("v1"), Duration::from_secs(10)).await.unwrap());
        assert_eq!(f.queue.read_state().await.unwrap().ready, 0);

        f.clock.advance(Duration::from_secs(10));
        let _delivery = f.queue.poll().await.unwrap().unwrap();
        assert!(!f.queue.reschedule(&bake("v1"), Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_state_counts_orphans() {
        let f = fixture();
        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();
        f.store
            .hset(&f.queue.keys().messages, "stray", "{}")
            .await
            .unwrap();

        let state = f.queue.read_state().await.unwrap();
        assert_eq!(
            state,
            QueueState {
                depth: 1,
                ready: 1,
                unacked: 0,
                orphaned: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_contains_message_pages_and_skips_garbage() {
        let f = fixture();
        for i in 0..250 {
            f.queue
                .push(&bake(&format!("v{i}")), Duration::ZERO)
                .await
                .unwrap();
        }
        f.store
            .hset(&f.queue.keys().messages, "broken", "not json")
            .await
            .unwrap();

        assert!(
            f.queue
                .contains_message(|m| m.payload["version"] == "v249")
                .await
                .unwrap()
        );
        assert!(
            !f.queue
                .contains_message(|m| m.kind == "deploy")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let f = fixture();
        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();
        f.queue.push(&bake("v2"), Duration::ZERO).await.unwrap();
        let _delivery = f.queue.poll().await.unwrap().unwrap();

        f.queue.clear().await.unwrap();
        assert_eq!(f.queue.read_state().await.unwrap(), QueueState::default());
        assert!(f.queue.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let f = fixture();
        f.store.set_available(false);

        let err = f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap_err();
        assert!(err.is_transient());
        assert!(f.queue.poll().await.unwrap_err().is_transient());
        assert!(f.queue.retry().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_poll_purges_missing_body() {
        let f = fixture();
        let keys = f.queue.keys();
        f.store.zadd(&keys.ready, "ghost", 0.0).await.unwrap();

        assert!(f.queue.poll().await.unwrap().is_none());
        assert_eq!(f.store.zcard(&keys.unacked).await.unwrap(), 0);
        assert_eq!(f.store.zcard(&keys.ready).await.unwrap(), 0);
        assert!(!f.store.lock_held(&keys.lock("ghost")));
    }

    #[tokio::test]
    async fn test_poll_purges_corrupt_body() {
        let f = fixture();
        let keys = f.queue.keys();
        f.store.zadd(&keys.ready, "bad", 0.0).await.unwrap();
        f.store.hset(&keys.messages, "bad", "{not json").await.unwrap();

        assert!(f.queue.poll().await.unwrap().is_none());
        assert_eq!(f.queue.read_state().await.unwrap(), QueueState::default());
    }

    #[tokio::test]
    async fn test_ack_timeout_override_sets_deadline() {
        let f = fixture();
        let message = bake("v1").with_ack_timeout(Duration::from_secs(5));
        f.queue.push(&message, Duration::ZERO).await.unwrap();

        let delivery = f.queue.poll().await.unwrap().unwrap();
        let deadline = f
            .store
            .zscore(&f.queue.keys().unacked, &delivery.fingerprint)
            .await
            .unwrap();
        assert_eq!(deadline, Some(1_005_000.0));
    }

    #[tokio::test]
    async fn test_poll_with_invokes_callback() {
        let f = fixture();
        assert!(!f.queue.poll_with(|_, _| panic!("nothing to deliver")).await.unwrap());

        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();
        let mut received = None;
        let invoked = f
            .queue
            .poll_with(|message, ack| received = Some((message, ack)))
            .await
            .unwrap();

        assert!(invoked);
        let (message, ack) = received.unwrap();
        assert_eq!(message.attempts(), 1);
        assert!(ack.ack().await.unwrap());
    }

    #[test]
    fn test_zero_message_max_attempts_falls_back() {
        let f = fixture();
        assert_eq!(f.queue.max_attempts_for(&bake("v1").with_max_attempts(0)), 5);
        assert_eq!(f.queue.max_attempts_for(&bake("v1").with_max_attempts(2)), 2);
        assert_eq!(f.queue.max_attempts_for(&bake("v1")), 5);
    }

    #[test]
    fn test_millis_after_saturates() {
        assert_eq!(millis_after(1_000, Duration::from_millis(500)), 1_500);
        assert_eq!(millis_after(1_000, Duration::from_millis(u64::MAX)), i64::MAX);
        assert_eq!(millis_after(1_000, Duration::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn test_huge_delay_schedules_far_future() {
        let f = fixture();
        f.queue
            .push(&bake("v1"), Duration::from_millis(u64::MAX))
            .await
            .unwrap();

        let fp = Fingerprint::of(&bake("v1")).unwrap().latest;
        let score = f
            .store
            .zscore(&f.queue.keys().ready, &fp)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(score, i64::MAX as f64);
        assert!(f.queue.poll().await.unwrap().is_none());

        assert!(
            f.queue
                .reschedule(&bake("v1"), Duration::from_millis(u64::MAX))
                .await
                .unwrap()
        );
        assert_eq!(f.queue.read_state().await.unwrap().ready, 0);
    }

    #[tokio::test]
    async fn test_poll_many_zero_claims_nothing() {
        let f = fixture();
        f.queue.push(&bake("v1"), Duration::ZERO).await.unwrap();

        assert!(f.queue.poll_many(0).await.unwrap().is_empty());
        assert_eq!(f.queue.read_state().await.unwrap().ready, 1);
    }
