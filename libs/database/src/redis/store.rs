//! [`KeyValueStore`] backed by a Redis [`ConnectionManager`].
//!
//! Plain commands go through `redis::cmd`; the two compound index moves run
//! as Lua scripts so they are atomic on the server.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

use super::check_health;
use crate::common::{DatabaseResult, RetryConfig};
use crate::store::{KeyValueStore, StoreResult};

/// Cursor page size for SCAN
const SCAN_COUNT: usize = 500;

const CLAIM_SCRIPT: &str = r"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped[1]
";

const MOVE_SCRIPT: &str = r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
    return 1
end
return 0
";

/// Format a sorted-set score, spelling out infinities the way Redis expects.
fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Redis-backed store shared by every service instance.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    claim_script: Script,
    move_script: Script,
}

impl RedisStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            claim_script: Script::new(CLAIM_SCRIPT),
            move_script: Script::new(MOVE_SCRIPT),
        }
    }

    /// Connect with retry and verify the connection with PING.
    pub async fn connect(
        config: &core_config::redis::RedisConfig,
        retry_config: Option<RetryConfig>,
    ) -> DatabaseResult<Self> {
        let manager = super::connect_with_retry(&config.connection_url(), retry_config).await?;
        Ok(Self::new(manager))
    }

    /// Get a cloned ConnectionManager
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        check_health(&mut self.conn()).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut self.conn()).await?;
        Ok(())
    }

    async fn set_if_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("XX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        // Nil reply means the key was absent and nothing was written
        let reply = cmd.query_async::<redis::Value>(&mut self.conn()).await?;
        Ok(!matches!(reply, redis::Value::Nil))
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let values = cmd
            .query_async::<Vec<Option<String>>>(&mut self.conn())
            .await?;
        Ok(values)
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            let cmd = pipe.cmd("SET").arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            cmd.ignore();
        }
        pipe.query_async::<()>(&mut self.conn()).await?;
        debug!(count = entries.len(), "Pipelined SET batch");
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let removed = cmd.query_async::<u64>(&mut self.conn()).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let exists = redis::cmd("EXISTS")
            .arg(key)
            .query_async::<bool>(&mut self.conn())
            .await?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let updated = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async::<bool>(&mut self.conn())
            .await?;
        Ok(updated)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        // -2: missing key, -1: no expiry
        let ms = redis::cmd("PTTL")
            .arg(key)
            .query_async::<i64>(&mut self.conn())
            .await?;
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let added = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<i64>(&mut self.conn())
            .await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let removed = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<i64>(&mut self.conn())
            .await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut members = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async::<Vec<String>>(&mut self.conn())
            .await?;
        members.sort();
        Ok(members)
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let count = redis::cmd("SCARD")
            .arg(key)
            .query_async::<u64>(&mut self.conn())
            .await?;
        Ok(count)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        redis::cmd("ZADD")
            .arg(key)
            .arg(score_arg(score))
            .arg(member)
            .query_async::<()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let removed = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async::<i64>(&mut self.conn())
            .await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let count = redis::cmd("ZCARD")
            .arg(key)
            .query_async::<u64>(&mut self.conn())
            .await?;
        Ok(count)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        let members = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async::<Vec<String>>(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn zpop_min_move(
        &self,
        src: &str,
        dst: &str,
        dst_score: f64,
    ) -> StoreResult<Option<String>> {
        let claimed: Option<String> = self
            .claim_script
            .key(src)
            .key(dst)
            .arg(score_arg(dst_score))
            .invoke_async(&mut self.conn())
            .await?;
        Ok(claimed)
    }

    async fn zmove(
        &self,
        src: &str,
        dst: &str,
        member: &str,
        dst_score: f64,
    ) -> StoreResult<bool> {
        let moved: i64 = self
            .move_script
            .key(src)
            .key(dst)
            .arg(member)
            .arg(score_arg(dst_score))
            .invoke_async(&mut self.conn())
            .await?;
        Ok(moved == 1)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let value = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async::<i64>(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let fields = redis::cmd("HGETALL")
            .arg(key)
            .query_async::<HashMap<String, String>>(&mut self.conn())
            .await?;
        Ok(fields)
    }
}
