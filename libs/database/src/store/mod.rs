//! Key-value store primitives used by the cache, session, and job layers.
//!
//! [`KeyValueStore`] is the narrow surface those layers depend on: strings with
//! expiry, sets, sorted sets, and hashes. Two implementations ship here:
//!
//! - [`RedisStore`](crate::redis::RedisStore) for shared deployments
//! - [`MemoryStore`] for a single process (tests, local runs)
//!
//! Both provide two compound operations that execute atomically, so a job id
//! can be moved between indices without a read-then-write window:
//!
//! - [`zpop_min_move`](KeyValueStore::zpop_min_move) claims the lowest-scored member
//! - [`zmove`](KeyValueStore::zmove) moves a known member, failing if it is absent

mod health;
mod memory;

pub use health::{check_store_health, HealthStatus};
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::DatabaseResult;

/// Result type for store operations
pub type StoreResult<T> = DatabaseResult<T>;

/// Shared store handle.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Primitive operations of the shared in-memory key-value store.
///
/// TTLs have millisecond precision. `None` TTL means the key never expires.
/// Sorted-set ranges are ascending by score, ties ordered by member bytes.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Round-trip check of the connection
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Overwrite `key` only while it still exists. Returns `false` without
    /// writing when the key is missing or expired.
    async fn set_if_exists(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> StoreResult<bool>;

    /// Fetch several string values; the result is aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// Write several string values in one round trip, all with the same TTL.
    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete keys of any type. Returns how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Set a key's remaining lifetime. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining lifetime; `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Keys matching a glob pattern (only `*` is interpreted).
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Returns true if the member was added.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Returns true if the member was present.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn scard(&self, key: &str) -> StoreResult<u64>;

    /// Insert or re-score a member.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Returns true if the member was present.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Members with `min <= score <= max`, ascending.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>>;

    /// Atomically pop the lowest-scored member of `src` and add it to `dst`.
    async fn zpop_min_move(
        &self,
        src: &str,
        dst: &str,
        dst_score: f64,
    ) -> StoreResult<Option<String>>;

    /// Atomically move `member` from `src` to `dst`.
    ///
    /// Returns false, leaving `dst` untouched, when `member` is not in `src`.
    async fn zmove(&self, src: &str, dst: &str, member: &str, dst_score: f64)
        -> StoreResult<bool>;

    /// Increment a hash field, returning the new value.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;
}

/// Escape glob metacharacters so `literal` matches only itself in a
/// [`scan_keys`](KeyValueStore::scan_keys) pattern.
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug)]
enum GlobToken {
    Star,
    AnyChar,
    Literal(char),
    Class { negated: bool, ranges: Vec<(char, char)> },
}

fn tokenize_glob(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        let token = match c {
            '*' => GlobToken::Star,
            '?' => GlobToken::AnyChar,
            // A trailing backslash matches itself
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let mut ranges = Vec::new();
                while let Some(c) = chars.next() {
                    let lo = match c {
                        ']' => break,
                        '\\' => chars.next().unwrap_or('\\'),
                        other => other,
                    };
                    let hi = if chars.next_if_eq(&'-').is_some() {
                        match chars.next() {
                            Some('\\') => chars.next().unwrap_or('\\'),
                            Some(']') | None => {
                                ranges.push((lo, lo));
                                ranges.push(('-', '-'));
                                break;
                            }
                            Some(other) => other,
                        }
                    } else {
                        lo
                    };
                    ranges.push(if lo <= hi { (lo, hi) } else { (hi, lo) });
                }
                GlobToken::Class { negated, ranges }
            }
            other => GlobToken::Literal(other),
        };
        tokens.push(token);
    }
    tokens
}

fn token_matches(token: &GlobToken, c: char) -> bool {
    match token {
        GlobToken::Star | GlobToken::AnyChar => true,
        GlobToken::Literal(l) => *l == c,
        GlobToken::Class { negated, ranges } => {
            ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c)) != *negated
        }
    }
}

/// Match a key against a Redis-style glob: `*`, `?`, `[...]` classes, and
/// backslash escapes.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let tokens = tokenize_glob(pattern);
    let key: Vec<char> = key.chars().collect();

    let (mut t, mut k) = (0, 0);
    // Position of the last `*` and the key index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;
    while k < key.len() {
        match tokens.get(t) {
            Some(GlobToken::Star) => {
                backtrack = Some((t, k));
                t += 1;
            }
            Some(token) if token_matches(token, key[k]) => {
                t += 1;
                k += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    backtrack = Some((star, absorbed + 1));
                    t = star + 1;
                    k = absorbed + 1;
                }
                None => return false,
            },
        }
    }
    tokens[t..].iter().all(|token| matches!(token, GlobToken::Star))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_prefix() {
        assert!(glob_match("cache:*", "cache:user:1"));
        assert!(!glob_match("cache:*", "session:1"));
    }

    #[test]
    fn test_glob_exact_and_infix() {
        assert!(glob_match("queue:jobs", "queue:jobs"));
        assert!(glob_match("queue:*:job:*", "queue:reminders:job:42"));
        assert!(!glob_match("queue:*:job:*", "queue:reminders:waiting"));
    }

    #[test]
    fn test_glob_suffix_does_not_overlap_prefix() {
        assert!(!glob_match("ab*ba", "aba"));
        assert!(glob_match("ab*ba", "abba"));
    }

    #[test]
    fn test_glob_single_char_and_class() {
        assert!(glob_match("user?", "user1"));
        assert!(!glob_match("user?", "user"));
        assert!(glob_match("job:[0-9]", "job:7"));
        assert!(!glob_match("job:[^0-9]", "job:7"));
        assert!(glob_match("job:[ab]*", "job:b42"));
    }

    #[test]
    fn test_escaped_literal_matches_only_itself() {
        let pattern = format!("{}*", escape_glob("cache:user?[1]*"));
        assert_eq!(pattern, r"cache:user\?\[1\]\**");
        assert!(glob_match(&pattern, "cache:user?[1]*:profile"));
        assert!(!glob_match(&pattern, "cache:userX[1]*:profile"));
        assert!(!glob_match(&pattern, "cache:user?1*"));
    }

    #[test]
    fn test_escape_glob_backslash() {
        let pattern = escape_glob(r"a\b");
        assert!(glob_match(&pattern, r"a\b"));
        assert!(!glob_match(&pattern, "ab"));
    }
}
