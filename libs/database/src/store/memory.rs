//! In-process [`KeyValueStore`] implementation.
//!
//! Mirrors the Redis semantics the coordination layer relies on: typed keys
//! (`WRONGTYPE` on mismatch), empty collections disappear, and TTLs expire
//! lazily on access. Time comes from the injected [`Clock`], so a
//! [`ManualClock`](crate::clock::ManualClock) makes expiry deterministic.
//!
//! Every operation holds the map lock for its whole duration, which is what
//! makes [`zpop_min_move`](KeyValueStore::zpop_min_move) and
//! [`zmove`](KeyValueStore::zmove) atomic here.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{glob_match, KeyValueStore, StoreResult};
use crate::clock::{SharedClock, SystemClock};
use crate::common::DatabaseError;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
    Hash(HashMap<String, String>),
}

impl Value {
    fn is_empty_collection(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
            Value::Hash(h) => h.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Epoch milliseconds
    expires_at: Option<i64>,
}

fn wrong_type(key: &str) -> DatabaseError {
    DatabaseError::Generic(format!(
        "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// Single-process store with Redis-compatible semantics.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryStore {
    /// Store driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| DatabaseError::Generic("memory store lock poisoned".to_string()))
    }

    /// Lock the map and drop `key` first if it has expired.
    fn lock_live(&self, key: &str) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        let now = self.clock.now_millis();
        let mut map = self.lock()?;
        purge_if_expired(&mut map, key, now);
        Ok(map)
    }

    fn deadline(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| self.clock.now_millis() + ttl.as_millis() as i64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_if_expired(map: &mut HashMap<String, Entry>, key: &str, now: i64) {
    let expired = map
        .get(key)
        .and_then(|entry| entry.expires_at)
        .is_some_and(|deadline| deadline <= now);
    if expired {
        map.remove(key);
    }
}

fn drop_if_empty(map: &mut HashMap<String, Entry>, key: &str) {
    if map.get(key).is_some_and(|e| e.value.is_empty_collection()) {
        map.remove(key);
    }
}

fn zset_mut<'a>(
    map: &'a mut HashMap<String, Entry>,
    key: &str,
) -> StoreResult<&'a mut HashMap<String, f64>> {
    let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::ZSet(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::ZSet(z) => Ok(z),
        _ => Err(wrong_type(key)),
    }
}

fn zset_ref<'a>(
    map: &'a HashMap<String, Entry>,
    key: &str,
) -> StoreResult<Option<&'a HashMap<String, f64>>> {
    match map.get(key).map(|e| &e.value) {
        None => Ok(None),
        Some(Value::ZSet(z)) => Ok(Some(z)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn set_ref<'a>(
    map: &'a HashMap<String, Entry>,
    key: &str,
) -> StoreResult<Option<&'a HashSet<String>>> {
    match map.get(key).map(|e| &e.value) {
        None => Ok(None),
        Some(Value::Set(s)) => Ok(Some(s)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn lowest_member(zset: &HashMap<String, f64>) -> Option<String> {
    zset.iter()
        .min_by(|(ma, sa), (mb, sb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)))
        .map(|(member, _)| member.clone())
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let map = self.lock_live(key)?;
        match map.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = self.deadline(ttl);
        let mut map = self.lock()?;
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let expires_at = self.deadline(ttl);
        let mut map = self.lock_live(key)?;
        match map.get_mut(key) {
            Some(entry) => {
                *entry = Entry {
                    value: Value::Str(value.to_string()),
                    expires_at,
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let now = self.clock.now_millis();
        let mut map = self.lock()?;
        let values = keys
            .iter()
            .map(|key| {
                purge_if_expired(&mut map, key, now);
                // MGET reports non-string keys as missing rather than failing
                match map.get(key).map(|e| &e.value) {
                    Some(Value::Str(s)) => Some(s.clone()),
                    _ => None,
                }
            })
            .collect();
        Ok(values)
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = self.deadline(ttl);
        let mut map = self.lock()?;
        for (key, value) in entries {
            map.insert(
                key.clone(),
                Entry {
                    value: Value::Str(value.clone()),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        let now = self.clock.now_millis();
        let mut map = self.lock()?;
        let mut removed = 0;
        for key in keys {
            purge_if_expired(&mut map, key, now);
            if map.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let map = self.lock_live(key)?;
        Ok(map.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let deadline = self.deadline(Some(ttl));
        let mut map = self.lock_live(key)?;
        match map.get_mut(key) {
            Some(entry) => {
                entry.expires_at = deadline;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now_millis();
        let map = self.lock_live(key)?;
        Ok(map
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|deadline| Duration::from_millis((deadline - now).max(0) as u64)))
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now_millis();
        let mut map = self.lock()?;
        map.retain(|_, entry| entry.expires_at.is_none_or(|deadline| deadline > now));
        let mut keys: Vec<String> = map
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut map = self.lock_live(key)?;
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(s) => Ok(s.insert(member.to_string())),
            _ => Err(wrong_type(key)),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut map = self.lock_live(key)?;
        let removed = match map.get_mut(key).map(|e| &mut e.value) {
            None => false,
            Some(Value::Set(s)) => s.remove(member),
            Some(_) => return Err(wrong_type(key)),
        };
        drop_if_empty(&mut map, key);
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let map = self.lock_live(key)?;
        let mut members: Vec<String> = set_ref(&map, key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let map = self.lock_live(key)?;
        Ok(set_ref(&map, key)?.map_or(0, |s| s.len() as u64))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut map = self.lock_live(key)?;
        zset_mut(&mut map, key)?.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut map = self.lock_live(key)?;
        let removed = if zset_ref(&map, key)?.is_some() {
            zset_mut(&mut map, key)?.remove(member).is_some()
        } else {
            false
        };
        drop_if_empty(&mut map, key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let map = self.lock_live(key)?;
        Ok(zset_ref(&map, key)?.map_or(0, |z| z.len() as u64))
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        let map = self.lock_live(key)?;
        let Some(zset) = zset_ref(&map, key)? else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(&String, f64)> = zset
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (member, *score))
            .collect();
        hits.sort_by(|(ma, sa), (mb, sb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)));
        Ok(hits.into_iter().map(|(member, _)| member.clone()).collect())
    }

    async fn zpop_min_move(
        &self,
        src: &str,
        dst: &str,
        dst_score: f64,
    ) -> StoreResult<Option<String>> {
        let now = self.clock.now_millis();
        let mut map = self.lock()?;
        purge_if_expired(&mut map, src, now);
        purge_if_expired(&mut map, dst, now);

        let Some(member) = zset_ref(&map, src)?.and_then(lowest_member) else {
            return Ok(None);
        };
        // Type-check the destination before mutating the source
        zset_mut(&mut map, dst)?;

        zset_mut(&mut map, src)?.remove(&member);
        drop_if_empty(&mut map, src);
        zset_mut(&mut map, dst)?.insert(member.clone(), dst_score);
        Ok(Some(member))
    }

    async fn zmove(
        &self,
        src: &str,
        dst: &str,
        member: &str,
        dst_score: f64,
    ) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        let mut map = self.lock()?;
        purge_if_expired(&mut map, src, now);
        purge_if_expired(&mut map, dst, now);

        let present = zset_ref(&map, src)?.is_some_and(|z| z.contains_key(member));
        if !present {
            return Ok(false);
        }
        zset_mut(&mut map, dst)?;

        zset_mut(&mut map, src)?.remove(member);
        drop_if_empty(&mut map, src);
        zset_mut(&mut map, dst)?.insert(member.to_string(), dst_score);
        Ok(true)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut map = self.lock_live(key)?;
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        let Value::Hash(hash) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                DatabaseError::Generic(format!("hash value at {}.{} is not an integer", key, field))
            })?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let map = self.lock_live(key)?;
        match map.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
