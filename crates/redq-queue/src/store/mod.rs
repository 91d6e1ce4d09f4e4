//! Backing store port.
//!
//! The queue core only talks to the store through [`QueueStore`]: scored
//! sets, hashes and self-expiring lock keys, plus compound operations that
//! must be atomic with respect to every other client of the store.
//!
//! Scores are epoch milliseconds held as `f64`.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Ready set: fingerprint scored by earliest delivery time.
    pub ready: String,
    /// Unacknowledged set: fingerprint scored by ack deadline.
    pub unacked: String,
    /// Message bodies by fingerprint.
    pub messages: String,
    /// Delivery attempt counters by fingerprint.
    pub attempts: String,
    lock_prefix: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            ready: format!("{name}.queue"),
            unacked: format!("{name}.unacked"),
            messages: format!("{name}.messages"),
            attempts: format!("{name}.attempts"),
            lock_prefix: format!("{name}.locks:"),
        }
    }

    /// Claim lock key for a fingerprint.
    pub fn lock(&self, fingerprint: &str) -> String {
        format!("{}{}", self.lock_prefix, fingerprint)
    }

    pub fn lock_prefix(&self) -> &str {
        &self.lock_prefix
    }
}

/// One write inside a [`QueueStore::transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    ZAdd {
        set: String,
        member: String,
        score: f64,
    },
    ZRem {
        set: String,
        member: String,
    },
    HSet {
        hash: String,
        field: String,
        value: String,
    },
    HSetNx {
        hash: String,
        field: String,
        value: String,
    },
    HDel {
        hash: String,
        field: String,
    },
    Del {
        key: String,
    },
}

/// Parameters of a claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Only members scored at or below this are eligible.
    pub now: i64,
    /// Score given to the claimed member in the unacked set.
    pub ack_deadline: i64,
    pub lock_ttl: Duration,
    /// Lock value, unique per claim.
    pub token: String,
    /// How many ready members to try before giving up.
    pub candidates: usize,
}

/// A message moved from Ready to Unacked under lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedMessage {
    pub fingerprint: String,
    /// Ready score at the time of the claim.
    pub scheduled_at: f64,
    /// Stored body, `None` if the body is missing.
    pub body: Option<String>,
    /// Attempt counter, zero if missing.
    pub attempts: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Nothing is due.
    Empty,
    /// Due members exist but all of them were locked.
    Contended { attempted: usize },
    Claimed(ClaimedMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The message is gone from the queue.
    Removed,
    /// A re-pushed copy was waiting in Ready and was kept.
    KeptDuplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Moved back to Ready.
    Requeued { attempts: i64 },
    /// Already in Ready; the unacked entry was dropped.
    Duplicate { attempts: i64 },
    /// No longer unacked.
    Gone,
}

/// Atomic primitives the queue core is built on.
///
/// Implementations must make each method atomic on its own. Callers never
/// assume partial success: if the store is unreachable, the call fails
/// with [`StoreError::Unavailable`].
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn zadd(&self, set: &str, member: &str, score: f64) -> Result<(), StoreError>;

    async fn zscore(&self, set: &str, member: &str) -> Result<Option<f64>, StoreError>;

    /// Remove a member, returning whether it was present.
    async fn zrem(&self, set: &str, member: &str) -> Result<bool, StoreError>;

    async fn zcard(&self, set: &str) -> Result<u64, StoreError>;

    /// Members scored at or below `max`.
    async fn zcount(&self, set: &str, max: f64) -> Result<u64, StoreError>;

    /// Members scored at or below `max`, lowest score first.
    async fn range_by_score(
        &self,
        set: &str,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    /// Set the score only if the member is still present.
    async fn update_score_if_present(
        &self,
        set: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError>;

    /// Remove from `from` and add to `to` with `score`, only if present in `from`.
    async fn move_between_sets(
        &self,
        from: &str,
        to: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError>;

    /// Set `key` if it does not exist, expiring after `ttl`.
    async fn add_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete whole keys of any type, returning how many existed.
    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hlen(&self, hash: &str) -> Result<u64, StoreError>;

    /// Increment an integer field, creating it at zero first.
    async fn hincr(&self, hash: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    async fn hdel(&self, hash: &str, fields: &[String]) -> Result<u64, StoreError>;

    /// One page of a hash. A returned cursor of zero means the scan is done.
    async fn hscan(
        &self,
        hash: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<(String, String)>), StoreError>;

    /// Apply every op or none.
    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    /// Pick the earliest due member of Ready that can be locked, lock it,
    /// move it to Unacked and read its body and attempt counter.
    async fn claim_ready(
        &self,
        keys: &QueueKeys,
        request: &ClaimRequest,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Drop a member from Unacked and release its lock. Unless a copy is
    /// waiting in Ready, also delete its body and attempt counter. When a
    /// copy is waiting, its counter is reset to one.
    async fn acknowledge(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
    ) -> Result<AckOutcome, StoreError>;

    /// Move a member whose Unacked deadline is at or before `now` back to
    /// Ready at `now`, releasing its lock and incrementing its attempt
    /// counter. A counter that is not an integer counts as zero. A copy
    /// already in Ready is kept and pulled forward to `now` if it was
    /// scheduled later. A member that is not in Unacked, or whose deadline
    /// is later than `now`, is left alone and reported as [`RequeueOutcome::Gone`].
    async fn requeue_expired(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
        now: i64,
    ) -> Result<RequeueOutcome, StoreError>;

    /// [`QueueStore::acknowledge`] for a member whose Unacked deadline is at
    /// or before `now`. Returns `false` without touching anything when the
    /// member is not in Unacked or its deadline is later than `now`.
    async fn discard_expired(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
        now: i64,
    ) -> Result<bool, StoreError>;
}
