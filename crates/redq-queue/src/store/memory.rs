//! In-process store.
//!
//! All state sits behind one mutex, so every method (compound ones
//! included) is atomic with respect to every other caller in the process.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

use super::{
    AckOutcome, ClaimOutcome, ClaimRequest, ClaimedMessage, QueueKeys, QueueStore,
    RequeueOutcome, StoreOp,
};

/// Score with a total order so it can live in a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == CmpOrdering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct ScoredSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl ScoredSet {
    fn insert(&mut self, member: &str, score: f64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(Score(old), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn up_to(&self, max: f64) -> impl Iterator<Item = (&str, f64)> {
        self.ordered
            .iter()
            .take_while(move |(score, _)| score.0 <= max)
            .map(|(score, member)| (member.as_str(), score.0))
    }
}

#[derive(Debug)]
struct Expiring {
    value: String,
    expires_at: i64,
}

#[derive(Debug, Default)]
struct State {
    sets: HashMap<String, ScoredSet>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    strings: HashMap<String, Expiring>,
}

impl State {
    fn zadd(&mut self, set: &str, member: &str, score: f64) {
        self.sets.entry(set.to_string()).or_default().insert(member, score);
    }

    fn zscore(&self, set: &str, member: &str) -> Option<f64> {
        self.sets.get(set).and_then(|s| s.score(member))
    }

    fn zrem(&mut self, set: &str, member: &str) -> bool {
        let Some(s) = self.sets.get_mut(set) else {
            return false;
        };
        let removed = s.remove(member);
        if s.scores.is_empty() {
            self.sets.remove(set);
        }
        removed
    }

    fn range(&self, set: &str, max: f64, limit: Option<usize>) -> Vec<(String, f64)> {
        let Some(s) = self.sets.get(set) else {
            return Vec::new();
        };
        s.up_to(max)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(m, score)| (m.to_string(), score))
            .collect()
    }

    fn hget(&self, hash: &str, field: &str) -> Option<String> {
        self.hashes.get(hash).and_then(|h| h.get(field).cloned())
    }

    fn hset(&mut self, hash: &str, field: &str, value: &str) {
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    fn hset_nx(&mut self, hash: &str, field: &str, value: &str) {
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| value.to_string());
    }

    fn hdel(&mut self, hash: &str, field: &str) -> bool {
        let Some(h) = self.hashes.get_mut(hash) else {
            return false;
        };
        let removed = h.remove(field).is_some();
        if h.is_empty() {
            self.hashes.remove(hash);
        }
        removed
    }

    fn hincr(&mut self, hash: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let entry = self
            .hashes
            .entry(hash.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let current: i64 = entry.parse().map_err(|_| {
            StoreError::Command(format!("hash value at {hash}/{field} is not an integer"))
        })?;
        let next = current + by;
        *entry = next.to_string();
        Ok(next)
    }

    /// Whether `member` is in `set` scored at or below `now`.
    fn due(&self, set: &str, member: &str, now: i64) -> bool {
        self.zscore(set, member).is_some_and(|score| score <= now as f64)
    }

    fn forget(&mut self, keys: &QueueKeys, fingerprint: &str, now: i64) -> AckOutcome {
        self.zrem(&keys.unacked, fingerprint);
        self.del(&keys.lock(fingerprint), now);

        if self.zscore(&keys.ready, fingerprint).is_some() {
            self.hset(&keys.attempts, fingerprint, "1");
            return AckOutcome::KeptDuplicate;
        }

        self.hdel(&keys.messages, fingerprint);
        self.hdel(&keys.attempts, fingerprint);
        AckOutcome::Removed
    }

    fn del(&mut self, key: &str, now: i64) -> bool {
        let set = self.sets.remove(key).is_some();
        let hash = self.hashes.remove(key).is_some();
        let string = self
            .strings
            .remove(key)
            .is_some_and(|e| e.expires_at > now);
        set || hash || string
    }

    fn set_nx(&mut self, key: &str, value: &str, ttl: Duration, now: i64) -> bool {
        if let Some(existing) = self.strings.get(key) {
            if existing.expires_at > now {
                return false;
            }
        }
        self.strings.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: now + ttl.as_millis() as i64,
            },
        );
        true
    }

    fn apply(&mut self, op: &StoreOp, now: i64) -> Result<(), StoreError> {
        match op {
            StoreOp::ZAdd { set, member, score } => self.zadd(set, member, *score),
            StoreOp::ZRem { set, member } => {
                self.zrem(set, member);
            }
            StoreOp::HSet { hash, field, value } => self.hset(hash, field, value),
            StoreOp::HSetNx { hash, field, value } => self.hset_nx(hash, field, value),
            StoreOp::HDel { hash, field } => {
                self.hdel(hash, field);
            }
            StoreOp::Del { key } => {
                self.del(key, now);
            }
        }
        Ok(())
    }
}

/// Single-process [`QueueStore`].
pub struct MemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Lock expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a live lock key exists. Test helper.
    pub fn lock_held(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.state
            .lock()
            .strings
            .get(key)
            .is_some_and(|e| e.expires_at > now)
    }

    /// Value of a live lock key.
    pub fn lock_value(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        self.state
            .lock()
            .strings
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn zadd(&self, set: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().zadd(set, member, score);
        Ok(())
    }

    async fn zscore(&self, set: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.check()?;
        Ok(self.state.lock().zscore(set, member))
    }

    async fn zrem(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.state.lock().zrem(set, member))
    }

    async fn zcard(&self, set: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.state.lock().sets.get(set).map_or(0, |s| s.len() as u64))
    }

    async fn zcount(&self, set: &str, max: f64) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .sets
            .get(set)
            .map_or(0, |s| s.up_to(max).count() as u64))
    }

    async fn range_by_score(
        &self,
        set: &str,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.check()?;
        Ok(self.state.lock().range(set, max, limit))
    }

    async fn update_score_if_present(
        &self,
        set: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        if state.zscore(set, member).is_none() {
            return Ok(false);
        }
        state.zadd(set, member, score);
        Ok(true)
    }

    async fn move_between_sets(
        &self,
        from: &str,
        to: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        if !state.zrem(from, member) {
            return Ok(false);
        }
        state.zadd(to, member, score);
        Ok(true)
    }

    async fn add_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let now = self.clock.now_millis();
        Ok(self.state.lock().set_nx(key, value, ttl, now))
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check()?;
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        Ok(keys.iter().filter(|k| state.del(k, now)).count() as u64)
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.state.lock().hget(hash, field))
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().hset(hash, field, value);
        Ok(())
    }

    async fn hlen(&self, hash: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.state.lock().hashes.get(hash).map_or(0, |h| h.len() as u64))
    }

    async fn hincr(&self, hash: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        self.check()?;
        self.state.lock().hincr(hash, field, by)
    }

    async fn hdel(&self, hash: &str, fields: &[String]) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        Ok(fields.iter().filter(|f| state.hdel(hash, f)).count() as u64)
    }

    async fn hscan(
        &self,
        hash: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<(String, String)>), StoreError> {
        self.check()?;
        let state = self.state.lock();
        let Some(h) = state.hashes.get(hash) else {
            return Ok((0, Vec::new()));
        };
        let start = cursor as usize;
        let page: Vec<(String, String)> = h
            .iter()
            .skip(start)
            .take(count.max(1))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let next = start + page.len();
        let next_cursor = if page.is_empty() || next >= h.len() {
            0
        } else {
            next as u64
        };
        Ok((next_cursor, page))
    }

    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        self.check()?;
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        for op in &ops {
            state.apply(op, now)?;
        }
        Ok(())
    }

    async fn claim_ready(
        &self,
        keys: &QueueKeys,
        request: &ClaimRequest,
    ) -> Result<ClaimOutcome, StoreError> {
        self.check()?;
        let lock_now = self.clock.now_millis();
        let mut state = self.state.lock();

        let due = state.range(&keys.ready, request.now as f64, Some(request.candidates.max(1)));
        if due.is_empty() {
            return Ok(ClaimOutcome::Empty);
        }

        for (fingerprint, score) in &due {
            let lock_key = keys.lock(fingerprint);
            if !state.set_nx(&lock_key, &request.token, request.lock_ttl, lock_now) {
                continue;
            }
            state.zrem(&keys.ready, fingerprint);
            state.zadd(&keys.unacked, fingerprint, request.ack_deadline as f64);
            let body = state.hget(&keys.messages, fingerprint);
            let attempts = state
                .hget(&keys.attempts, fingerprint)
                .and_then(|a| a.parse().ok())
                .unwrap_or(0);
            return Ok(ClaimOutcome::Claimed(ClaimedMessage {
                fingerprint: fingerprint.clone(),
                scheduled_at: *score,
                body,
                attempts,
            }));
        }

        Ok(ClaimOutcome::Contended {
            attempted: due.len(),
        })
    }

    async fn acknowledge(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
    ) -> Result<AckOutcome, StoreError> {
        self.check()?;
        let now = self.clock.now_millis();
        Ok(self.state.lock().forget(keys, fingerprint, now))
    }

    async fn requeue_expired(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
        now: i64,
    ) -> Result<RequeueOutcome, StoreError> {
        self.check()?;
        let lock_now = self.clock.now_millis();
        let mut state = self.state.lock();

        if !state.due(&keys.unacked, fingerprint, now) {
            return Ok(RequeueOutcome::Gone);
        }
        let attempts = state
            .hget(&keys.attempts, fingerprint)
            .and_then(|a| a.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        state.hset(&keys.attempts, fingerprint, &attempts.to_string());
        state.zrem(&keys.unacked, fingerprint);
        state.del(&keys.lock(fingerprint), lock_now);
        let now = now as f64;

        match state.zscore(&keys.ready, fingerprint) {
            Some(score) => {
                if score > now {
                    state.zadd(&keys.ready, fingerprint, now);
                }
                Ok(RequeueOutcome::Duplicate { attempts })
            }
            None => {
                state.zadd(&keys.ready, fingerprint, now);
                Ok(RequeueOutcome::Requeued { attempts })
            }
        }
    }

    async fn discard_expired(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
        now: i64,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let lock_now = self.clock.now_millis();
        let mut state = self.state.lock();

        if !state.due(&keys.unacked, fingerprint, now) {
            return Ok(false);
        }
        state.forget(keys, fingerprint, lock_now);
        Ok(true)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
