
    use super::*;
    use crate::clock::MutableClock;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    struct Recording {
        kind: String,
        fail: bool,
        seen: Mutex<Vec<Message>>,
    }

    impl Recording {
        fn new(kind: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                kind: kind.to_string(),
                fail,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Recording {
        fn kind(&self) -> &str {
            &self.kind
        }

        async fn handle(&self, message: &Message) -> Result<(), QueueError> {
            self.seen.lock().push(message.clone());
            if self.fail {
                Err(QueueError::Handler("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn queue() -> (MessageQueue, Arc<MutableClock>) {
        let clock = Arc::new(MutableClock::new(1_000_000));
        let queue = MessageQueue::builder(Arc::new(MemoryStore::with_clock(clock.clone())))
            .clock(clock.clone())
            .build()
            .unwrap();
        (queue, clock)
    }

    fn config(batch: usize) -> ProcessorConfig {
        ProcessorConfig {
            poll_interval: Duration::from_millis(10),
            max_workers: 4,
            poll_batch: batch,
        }
    }

    #[tokio::test]
    async fn test_successful_handler_acks() {
        let (queue, _clock) = queue();
        let handler = Recording::new("bake", false);
        let processor = QueueProcessor::new(queue.clone(), config(1)).register(handler.clone());

        queue
            .push(&Message::new("bake", json!({"v": 1})), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(processor.poll_once().await.unwrap(), 1);
        processor.wait_idle().await;

        assert_eq!(processor.processed(), 1);
        assert_eq!(handler.seen.lock()[0].attempts(), 1);

        let state = queue.read_state().await.unwrap();
        assert_eq!(state.depth, 0);
        assert_eq!(state.unacked, 0);
        assert_eq!(state.orphaned, 0);
    }

    #[tokio::test]
    async fn test_failed_handler_leaves_unacked() {
        let (queue, _clock) = queue();
        let processor =
            QueueProcessor::new(queue.clone(), config(1)).register(Recording::new("bake", true));

        queue
            .push(&Message::new("bake", json!({})), Duration::ZERO)
            .await
            .unwrap();

        processor.poll_once().await.unwrap();
        processor.wait_idle().await;

        assert_eq!(processor.failed(), 1);
        assert_eq!(processor.processed(), 0);
        assert_eq!(queue.read_state().await.unwrap().unacked, 1);
    }

    #[tokio::test]
    async fn test_unknown_kind_left_unacked() {
        let (queue, _clock) = queue();
        let processor =
            QueueProcessor::new(queue.clone(), config(1)).register(Recording::new("bake", false));

        queue
            .push(&Message::new("deploy", json!({})), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(processor.poll_once().await.unwrap(), 0);
        assert_eq!(processor.unhandled(), 1);
        assert_eq!(queue.read_state().await.unwrap().unacked, 1);
    }

    #[tokio::test]
    async fn test_fallback_handles_other_kinds() {
        let (queue, _clock) = queue();
        let fallback = Recording::new("*", false);
        let processor = QueueProcessor::new(queue.clone(), config(4))
            .register(Recording::new("bake", false))
            .with_fallback(fallback.clone());

        for kind in ["deploy", "resize"] {
            queue
                .push(&Message::new(kind, json!({})), Duration::ZERO)
                .await
                .unwrap();
        }

        assert_eq!(processor.poll_once().await.unwrap(), 2);
        processor.wait_idle().await;
        assert_eq!(fallback.seen.lock().len(), 2);
        assert_eq!(processor.processed(), 2);
    }

    #[tokio::test]
    async fn test_batch_bounded_by_config() {
        let (queue, _clock) = queue();
        let processor =
            QueueProcessor::new(queue.clone(), config(2)).register(Recording::new("bake", false));

        for i in 0..5 {
            queue
                .push(&Message::new("bake", json!({ "n": i })), Duration::ZERO)
                .await
                .unwrap();
        }

        assert_eq!(processor.poll_once().await.unwrap(), 2);
        processor.wait_idle().await;
        assert_eq!(queue.read_state().await.unwrap().depth, 3);
    }

    #[tokio::test]
    async fn test_run_loop_drains_and_stops() {
        let queue = MessageQueue::builder(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        let handler = Recording::new("bake", false);
        let processor = Arc::new(
            QueueProcessor::new(queue.clone(), config(1)).register(handler.clone()),
        );

        queue
            .push(&Message::new("bake", json!({})), Duration::ZERO)
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = processor.clone().spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(!processor.is_running());
        assert_eq!(processor.processed(), 1);
        assert_eq!(processor.available_workers(), 4);
    }
