
    use super::*;
    use crate::clock::MutableClock;
    use crate::message::Message;
    use crate::metrics::MetricsRegistry;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn queue_with_clock() -> (MessageQueue, Arc<MutableClock>) {
        let clock = Arc::new(MutableClock::new(1_000_000));
        let queue = MessageQueue::builder(Arc::new(MemoryStore::with_clock(clock.clone())))
            .clock(clock.clone())
            .build()
            .unwrap();
        (queue, clock)
    }

    fn config(exclusive: bool) -> SupervisorConfig {
        SupervisorConfig {
            retry_interval: Duration::from_secs(10),
            exclusive,
        }
    }

    #[tokio::test]
    async fn test_sweep_once_requeues_expired() {
        let (queue, clock) = queue_with_clock();
        queue
            .push(&Message::new("bake", json!({"v": 1})), Duration::ZERO)
            .await
            .unwrap();
        let delivery = queue.poll().await.unwrap().unwrap();
        assert!(!delivery.ack.is_acked());

        clock.advance(queue.config().ack_timeout + Duration::from_millis(1));

        let supervisor = RetrySupervisor::new(queue.clone(), config(false));
        let summary = supervisor.sweep_once().await.unwrap().unwrap();
        assert_eq!(summary.retried, 1);
        assert_eq!(supervisor.sweeps(), 1);
        assert_eq!(queue.read_state().await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_exclusive_sweep_skips_when_held() {
        let (queue, clock) = queue_with_clock();
        let first = RetrySupervisor::new(queue.clone(), config(true));
        let second = RetrySupervisor::new(queue.clone(), config(true));

        assert!(first.sweep_once().await.unwrap().is_some());
        assert!(second.sweep_once().await.unwrap().is_none());
        assert_eq!(second.sweeps(), 0);

        clock.advance(Duration::from_secs(11));
        assert!(second.sweep_once().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_samples_metrics() {
        let (queue, _clock) = queue_with_clock();
        queue
            .push(&Message::new("bake", json!({})), Duration::ZERO)
            .await
            .unwrap();

        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Arc::new(MetricsPublisher::new(registry.clone()));
        let supervisor = RetrySupervisor::new(queue, config(false)).with_metrics(metrics);

        supervisor.sweep_once().await.unwrap();
        assert_eq!(registry.get_gauge("redq_queue_depth"), Some(1));
    }

    #[tokio::test]
    async fn test_sweep_error_propagates_from_store() {
        let store = Arc::new(MemoryStore::new());
        let queue = MessageQueue::builder(store.clone()).build().unwrap();
        let supervisor = RetrySupervisor::new(queue, config(false));

        store.set_available(false);
        let err = supervisor.sweep_once().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let queue = MessageQueue::builder(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        let supervisor = Arc::new(RetrySupervisor::new(
            queue,
            SupervisorConfig {
                retry_interval: Duration::from_millis(10),
                exclusive: false,
            },
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = supervisor.clone().spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(supervisor.sweeps() >= 1);
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.sweep_errors(), 0);
    }
