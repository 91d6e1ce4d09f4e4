//! Queue lifecycle against a live Redis.
//!
//! Ignored by default. Run with
//! `REDQ_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use redq_queue::{
    Message, MessageQueue, MutableClock, QueueConfig, QueueState, QueueStore, RedisStore,
    RequeueOutcome,
};

async fn queue(max_attempts: u32) -> Option<(MessageQueue, Arc<MutableClock>)> {
    let url = std::env::var("REDQ_TEST_REDIS_URL").ok()?;
    let store = RedisStore::connect(&url, Duration::from_secs(5))
        .await
        .unwrap();
    let clock = Arc::new(MutableClock::starting_now());
    let name = format!("redq-test-{}", Uuid::new_v4());
    let queue = MessageQueue::builder(Arc::new(store))
        .config(
            QueueConfig::default()
                .with_name(name)
                .with_max_attempts(max_attempts),
        )
        .clock(clock.clone())
        .build()
        .unwrap();
    Some((queue, clock))
}

#[tokio::test]
#[ignore]
async fn test_redis_push_poll_ack() {
    let Some((queue, _clock)) = queue(5).await else {
        return;
    };
    let message = Message::new("bake", json!({ "version": "v1" }));

    queue.push(&message, Duration::ZERO).await.unwrap();
    queue.push(&message, Duration::ZERO).await.unwrap();
    assert_eq!(queue.read_state().await.unwrap().depth, 1);

    let delivery = queue.poll().await.unwrap().unwrap();
    assert_eq!(delivery.message.attempts(), 1);
    assert!(queue.poll().await.unwrap().is_none());

    assert!(delivery.ack.ack().await.unwrap());
    assert_eq!(queue.read_state().await.unwrap(), QueueState::default());
}

#[tokio::test]
#[ignore]
async fn test_redis_retry_until_dead() {
    let Some((queue, clock)) = queue(2).await else {
        return;
    };
    queue
        .push(&Message::new("bake", json!({ "version": "v2" })), Duration::ZERO)
        .await
        .unwrap();

    let first = queue.poll().await.unwrap().unwrap();
    clock.advance(queue.config().ack_timeout + Duration::from_millis(1));
    assert_eq!(queue.retry().await.unwrap().retried, 1);

    let second = queue.poll().await.unwrap().unwrap();
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(second.message.attempts(), 2);

    clock.advance(queue.config().ack_timeout + Duration::from_millis(1));
    assert_eq!(queue.retry().await.unwrap().dead, 1);
    assert_eq!(queue.read_state().await.unwrap(), QueueState::default());

    queue.clear().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_redis_contains_and_clear() {
    let Some((queue, _clock)) = queue(5).await else {
        return;
    };
    for i in 0..150 {
        queue
            .push(&Message::new("bake", json!({ "n": i })), Duration::ZERO)
            .await
            .unwrap();
    }

    assert!(
        queue
            .contains_message(|m| m.payload["n"] == 149)
            .await
            .unwrap()
    );

    queue.clear().await.unwrap();
    assert_eq!(queue.store().zcard(&queue.keys().ready).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_redis_requeue_respects_live_deadline() {
    let Some((queue, _clock)) = queue(5).await else {
        return;
    };
    let store = queue.store().clone();
    let keys = queue.keys().clone();

    store.zadd(&keys.unacked, "fp", 5_000.0).await.unwrap();
    store.hset(&keys.messages, "fp", "{}").await.unwrap();
    store.hset(&keys.attempts, "fp", "x").await.unwrap();
    store
        .add_if_absent_with_expiry(&keys.lock("fp"), "holder", Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(
        store.requeue_expired(&keys, "fp", 1_000).await.unwrap(),
        RequeueOutcome::Gone
    );
    assert!(!store.discard_expired(&keys, "fp", 1_000).await.unwrap());
    assert_eq!(store.zscore(&keys.unacked, "fp").await.unwrap(), Some(5_000.0));

    assert_eq!(
        store.requeue_expired(&keys, "fp", 6_000).await.unwrap(),
        RequeueOutcome::Requeued { attempts: 1 }
    );
    assert!(
        store
            .add_if_absent_with_expiry(&keys.lock("fp"), "next", Duration::from_secs(30))
            .await
            .unwrap()
    );

    queue.clear().await.unwrap();
    store.delete_keys(&[keys.lock("fp")]).await.unwrap();
}
