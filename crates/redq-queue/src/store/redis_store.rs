//! Redis-backed store.
//!
//! Single commands map one to one onto Redis commands. Compound
//! operations run as Lua scripts so they are atomic on the server, and
//! [`QueueStore::transaction`] is a `MULTI`/`EXEC` pipeline.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use tracing::{debug, info};

use crate::error::StoreError;

use super::{
    AckOutcome, ClaimOutcome, ClaimRequest, ClaimedMessage, QueueKeys, QueueStore,
    RequeueOutcome, StoreOp,
};

/// KEYS: ready, unacked, messages, attempts.
/// ARGV: lock prefix, now, ack deadline, lock ttl ms, token, candidates.
const CLAIM_READY: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[2], 'WITHSCORES', 'LIMIT', 0, tonumber(ARGV[6]))
if #due == 0 then
  return {0}
end
for i = 1, #due, 2 do
  local fp = due[i]
  if redis.call('SET', ARGV[1] .. fp, ARGV[5], 'NX', 'PX', ARGV[4]) then
    redis.call('ZREM', KEYS[1], fp)
    redis.call('ZADD', KEYS[2], ARGV[3], fp)
    local body = redis.call('HGET', KEYS[3], fp)
    local count = tonumber(redis.call('HGET', KEYS[4], fp)) or 0
    return {1, fp, due[i + 1], body, count}
  end
end
return {2, #due / 2}
"#;

/// KEYS: set. ARGV: member, score.
const UPDATE_SCORE_IF_PRESENT: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
  return 1
end
return 0
"#;

/// KEYS: from, to. ARGV: member, score.
const MOVE_BETWEEN_SETS: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
  redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
  return 1
end
return 0
"#;

/// KEYS: ready, unacked, messages, attempts, lock. ARGV: fingerprint.
const ACKNOWLEDGE: &str = r#"
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('DEL', KEYS[5])
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  redis.call('HSET', KEYS[4], ARGV[1], 1)
  return 1
end
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
return 0
"#;

/// KEYS: ready, unacked, attempts, lock. ARGV: fingerprint, now.
const REQUEUE_EXPIRED: &str = r#"
local deadline = redis.call('ZSCORE', KEYS[2], ARGV[1])
if not deadline or tonumber(deadline) > tonumber(ARGV[2]) then
  return {0, 0}
end
local count = math.floor(tonumber(redis.call('HGET', KEYS[3], ARGV[1])) or 0) + 1
redis.call('HSET', KEYS[3], ARGV[1], count)
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('DEL', KEYS[4])
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if score then
  if tonumber(score) > tonumber(ARGV[2]) then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
  end
  return {2, count}
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return {1, count}
"#;

/// KEYS: ready, unacked, messages, attempts, lock. ARGV: fingerprint, now.
const DISCARD_EXPIRED: &str = r#"
local deadline = redis.call('ZSCORE', KEYS[2], ARGV[1])
if not deadline or tonumber(deadline) > tonumber(ARGV[2]) then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('DEL', KEYS[5])
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  redis.call('HSET', KEYS[4], ARGV[1], 1)
else
  redis.call('HDEL', KEYS[3], ARGV[1])
  redis.call('HDEL', KEYS[4], ARGV[1])
end
return 1
"#;

/// [`QueueStore`] over a Redis server.
///
/// Cloning is cheap; clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    claim_ready: Script,
    update_score: Script,
    move_member: Script,
    acknowledge: Script,
    requeue: Script,
    discard: Script,
}

impl RedisStore {
    /// Connect, failing with [`StoreError::Unavailable`] if the server does
    /// not answer within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!("timed out connecting to {}", redact(url)))
            })??;
        info!("Connected to Redis at {}", redact(url));
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            claim_ready: Script::new(CLAIM_READY),
            update_score: Script::new(UPDATE_SCORE_IF_PRESENT),
            move_member: Script::new(MOVE_BETWEEN_SETS),
            acknowledge: Script::new(ACKNOWLEDGE),
            requeue: Script::new(REQUEUE_EXPIRED),
            discard: Script::new(DISCARD_EXPIRED),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &url[..scheme], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

fn corrupt(what: &str, reply: &[Value]) -> StoreError {
    StoreError::Corrupt(format!("{what}: unexpected reply {reply:?}"))
}

fn parse_claim(reply: Vec<Value>) -> Result<ClaimOutcome, StoreError> {
    let status: i64 = match reply.first() {
        Some(v) => redis::from_redis_value(v)?,
        None => return Err(corrupt("claim", &reply)),
    };
    match (status, reply.as_slice()) {
        (0, _) => Ok(ClaimOutcome::Empty),
        (2, [_, attempted]) => Ok(ClaimOutcome::Contended {
            attempted: redis::from_redis_value(attempted)?,
        }),
        (1, [_, fingerprint, score, body, attempts]) => {
            let body = match body {
                Value::Nil => None,
                other => Some(redis::from_redis_value(other)?),
            };
            Ok(ClaimOutcome::Claimed(ClaimedMessage {
                fingerprint: redis::from_redis_value(fingerprint)?,
                scheduled_at: redis::from_redis_value(score)?,
                body,
                attempts: redis::from_redis_value(attempts)?,
            }))
        }
        _ => Err(corrupt("claim", &reply)),
    }
}

fn parse_requeue(reply: Vec<i64>) -> Result<RequeueOutcome, StoreError> {
    match reply.as_slice() {
        [0, _] => Ok(RequeueOutcome::Gone),
        [1, attempts] => Ok(RequeueOutcome::Requeued {
            attempts: *attempts,
        }),
        [2, attempts] => Ok(RequeueOutcome::Duplicate {
            attempts: *attempts,
        }),
        _ => Err(StoreError::Corrupt(format!(
            "requeue: unexpected reply {reply:?}"
        ))),
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn zadd(&self, set: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let _: i64 = redis::cmd("ZADD")
            .arg(set)
            .arg(score)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn zscore(&self, set: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(set)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(score)
    }

    async fn zrem(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let removed: i64 = redis::cmd("ZREM")
            .arg(set)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, set: &str) -> Result<u64, StoreError> {
        let count: u64 = redis::cmd("ZCARD")
            .arg(set)
            .query_async(&mut self.conn())
            .await?;
        Ok(count)
    }

    async fn zcount(&self, set: &str, max: f64) -> Result<u64, StoreError> {
        let count: u64 = redis::cmd("ZCOUNT")
            .arg(set)
            .arg("-inf")
            .arg(max)
            .query_async(&mut self.conn())
            .await?;
        Ok(count)
    }

    async fn range_by_score(
        &self,
        set: &str,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(set).arg("-inf").arg(max).arg("WITHSCORES");
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(0).arg(limit);
        }
        let members: Vec<(String, f64)> = cmd.query_async(&mut self.conn()).await?;
        Ok(members)
    }

    async fn update_score_if_present(
        &self,
        set: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError> {
        let updated: i64 = self
            .update_score
            .key(set)
            .arg(member)
            .arg(score)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(updated == 1)
    }

    async fn move_between_sets(
        &self,
        from: &str,
        to: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError> {
        let moved: i64 = self
            .move_member
            .key(from)
            .key(to)
            .arg(member)
            .arg(score)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(moved == 1)
    }

    async fn add_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let reply: Value = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.conn())
            .await?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn())
            .await?;
        Ok(deleted)
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = redis::cmd("HGET")
            .arg(hash)
            .arg(field)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let _: i64 = redis::cmd("HSET")
            .arg(hash)
            .arg(field)
            .arg(value)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn hlen(&self, hash: &str) -> Result<u64, StoreError> {
        let len: u64 = redis::cmd("HLEN")
            .arg(hash)
            .query_async(&mut self.conn())
            .await?;
        Ok(len)
    }

    async fn hincr(&self, hash: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let value: i64 = redis::cmd("HINCRBY")
            .arg(hash)
            .arg(field)
            .arg(by)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn hdel(&self, hash: &str, fields: &[String]) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let removed: u64 = redis::cmd("HDEL")
            .arg(hash)
            .arg(fields)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed)
    }

    async fn hscan(
        &self,
        hash: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<(String, String)>), StoreError> {
        let (next, entries): (u64, Vec<(String, String)>) = redis::cmd("HSCAN")
            .arg(hash)
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn())
            .await?;
        Ok((next, entries))
    }

    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::ZAdd { set, member, score } => {
                    pipe.cmd("ZADD").arg(set).arg(*score).arg(member).ignore();
                }
                StoreOp::ZRem { set, member } => {
                    pipe.cmd("ZREM").arg(set).arg(member).ignore();
                }
                StoreOp::HSet { hash, field, value } => {
                    pipe.cmd("HSET").arg(hash).arg(field).arg(value).ignore();
                }
                StoreOp::HSetNx { hash, field, value } => {
                    pipe.cmd("HSETNX").arg(hash).arg(field).arg(value).ignore();
                }
                StoreOp::HDel { hash, field } => {
                    pipe.cmd("HDEL").arg(hash).arg(field).ignore();
                }
                StoreOp::Del { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
            }
        }
        let _: () = pipe.query_async(&mut self.conn()).await?;
        debug!("Committed transaction of {} ops", ops.len());
        Ok(())
    }

    async fn claim_ready(
        &self,
        keys: &QueueKeys,
        request: &ClaimRequest,
    ) -> Result<ClaimOutcome, StoreError> {
        let reply: Vec<Value> = self
            .claim_ready
            .key(&keys.ready)
            .key(&keys.unacked)
            .key(&keys.messages)
            .key(&keys.attempts)
            .arg(keys.lock_prefix())
            .arg(request.now)
            .arg(request.ack_deadline)
            .arg(request.lock_ttl.as_millis() as u64)
            .arg(&request.token)
            .arg(request.candidates.max(1))
            .invoke_async(&mut self.conn())
            .await?;
        parse_claim(reply)
    }

    async fn acknowledge(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
    ) -> Result<AckOutcome, StoreError> {
        let kept: i64 = self
            .acknowledge
            .key(&keys.ready)
            .key(&keys.unacked)
            .key(&keys.messages)
            .key(&keys.attempts)
            .key(keys.lock(fingerprint))
            .arg(fingerprint)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(if kept == 1 {
            AckOutcome::KeptDuplicate
        } else {
            AckOutcome::Removed
        })
    }

    async fn requeue_expired(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
        now: i64,
    ) -> Result<RequeueOutcome, StoreError> {
        let reply: Vec<i64> = self
            .requeue
            .key(&keys.ready)
            .key(&keys.unacked)
            .key(&keys.attempts)
            .key(keys.lock(fingerprint))
            .arg(fingerprint)
            .arg(now)
            .invoke_async(&mut self.conn())
            .await?;
        parse_requeue(reply)
    }

    async fn discard_expired(
        &self,
        keys: &QueueKeys,
        fingerprint: &str,
        now: i64,
    ) -> Result<bool, StoreError> {
        let discarded: i64 = self
            .discard
            .key(&keys.ready)
            .key(&keys.unacked)
            .key(&keys.messages)
            .key(&keys.attempts)
            .key(keys.lock(fingerprint))
            .arg(fingerprint)
            .arg(now)
            .invoke_async(&mut self.conn())
            .await?;
        debug!(%fingerprint, discarded, "Discarded expired delivery");
        Ok(discarded == 1)
    }
}
