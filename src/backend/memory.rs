//! In-process backend for tests and credential-less development.
//!
//! Implements the same command semantics as the REST backend (per-key
//! expiry, SET NX, cursor-based scans) over a mutexed map, so the service
//! and invalidation layers exercise identical code paths in both.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::CacheError;

use super::{KvBackend, ScanPage};

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
struct SetEntry {
    members: BTreeSet<String>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    strings: BTreeMap<String, StringEntry>,
    sets: BTreeMap<String, SetEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of live keys, for test assertions.
    pub fn len(&self) -> usize {
        let mut state = self.lock();
        purge_expired(&mut state);
        state.strings.len() + state.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn deadline(ttl_secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(ttl_secs)
}

fn expired(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|at| at <= Instant::now())
}

fn purge_expired(state: &mut State) {
    state.strings.retain(|_, entry| !expired(entry.expires_at));
    state.sets.retain(|_, entry| !expired(entry.expires_at));
}

fn remaining_secs(expires_at: Option<Instant>) -> i64 {
    match expires_at {
        None => -1,
        Some(at) => {
            let now = Instant::now();
            if at <= now {
                -2
            } else {
                (at - now).as_secs_f64().ceil() as i64
            }
        }
    }
}

/// Glob match supporting `*` only, which is all the key patterns use.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut remainder = key;
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if index == 0 {
            match remainder.strip_prefix(segment) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if index == segments.len() - 1 {
            return remainder.ends_with(segment);
        } else {
            match remainder.find(segment) {
                Some(at) => remainder = &remainder[at + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        Ok(state.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), CacheError> {
        let mut state = self.lock();
        state.sets.remove(key);
        state.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl_secs.map(deadline),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        if state.strings.contains_key(key) || state.sets.contains_key(key) {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(deadline(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        let mut deleted = 0;
        for key in keys {
            if state.strings.remove(key).is_some() || state.sets.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn scan(&self, cursor: &str, pattern: &str, count: u64) -> Result<ScanPage, CacheError> {
        let start: usize = cursor
            .parse()
            .map_err(|_| CacheError::protocol(format!("invalid scan cursor `{cursor}`")))?;

        let mut state = self.lock();
        purge_expired(&mut state);

        let all_keys: Vec<&String> = state.strings.keys().chain(state.sets.keys()).collect();
        let count = count.max(1) as usize;
        let window: Vec<String> = all_keys
            .iter()
            .skip(start)
            .take(count)
            .filter(|key| glob_match(pattern, key))
            .map(|key| (*key).clone())
            .collect();

        let next = start + count;
        let cursor = if next >= all_keys.len() {
            "0".to_string()
        } else {
            next.to_string()
        };
        Ok(ScanPage {
            cursor,
            keys: window,
        })
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        let entry = state.strings.entry(key.to_string()).or_insert(StringEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::backend("value is not an integer"))?;
        let next = current + by;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        if let Some(entry) = state.strings.get_mut(key) {
            entry.expires_at = Some(deadline(ttl_secs));
            return Ok(true);
        }
        if let Some(entry) = state.sets.get_mut(key) {
            entry.expires_at = Some(deadline(ttl_secs));
            return Ok(true);
        }
        Ok(false)
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        if let Some(entry) = state.strings.get(key) {
            return Ok(remaining_secs(entry.expires_at));
        }
        if let Some(entry) = state.sets.get(key) {
            return Ok(remaining_secs(entry.expires_at));
        }
        Ok(-2)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        Ok(state.strings.contains_key(key) || state.sets.contains_key(key))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        Ok(keys
            .iter()
            .map(|key| state.strings.get(key).map(|entry| entry.value.clone()))
            .collect())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<u64, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        let entry = state.sets.entry(key.to_string()).or_default();
        Ok(u64::from(entry.members.insert(member.to_string())))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<u64, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        match state.sets.get_mut(key) {
            Some(entry) => Ok(u64::from(entry.members.remove(member))),
            None => Ok(0),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        Ok(state
            .sets
            .get(key)
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut state = self.lock();
        purge_expired(&mut state);
        Ok(state
            .sets
            .get(key)
            .is_some_and(|entry| entry.members.contains(member)))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", Some(1)).await.unwrap();

        // Force the deadline into the past instead of sleeping.
        {
            let mut state = backend.lock();
            state.strings.get_mut("k").unwrap().expires_at =
                Some(Instant::now() - Duration::from_secs(1));
        }

        assert!(backend.get("k").await.unwrap().is_none());
        assert_eq!(backend.ttl("k").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn set_nx_respects_existing_keys() {
        let backend = MemoryBackend::new();
        assert!(backend.set_nx("lock", "1", 10).await.unwrap());
        assert!(!backend.set_nx("lock", "1", 10).await.unwrap());
    }

    #[tokio::test]
    async fn del_counts_only_existing_keys() {
        let backend = MemoryBackend::new();
        backend.set("a", "1", None).await.unwrap();
        let deleted = backend
            .del(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn incr_creates_and_advances_counter() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.incr_by("n", 1).await.unwrap(), 1);
        assert_eq!(backend.incr_by("n", 1).await.unwrap(), 2);
        assert_eq!(backend.incr_by("n", 5).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn scan_pages_through_the_keyspace() {
        let backend = MemoryBackend::new();
        for i in 0..25 {
            backend
                .set(&format!("blog:stats:{i:02}"), "0", None)
                .await
                .unwrap();
        }
        backend.set("events:upcoming", "[]", None).await.unwrap();

        let mut cursor = "0".to_string();
        let mut matched = Vec::new();
        let mut iterations = 0;
        loop {
            let page = backend.scan(&cursor, "blog:*", 10).await.unwrap();
            matched.extend(page.keys);
            iterations += 1;
            if page.cursor == "0" {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(matched.len(), 25);
        assert!(iterations >= 3);
        assert!(!matched.contains(&"events:upcoming".to_string()));
    }

    #[tokio::test]
    async fn sets_track_members() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.sadd("s", "a").await.unwrap(), 1);
        assert_eq!(backend.sadd("s", "a").await.unwrap(), 0);
        backend.sadd("s", "b").await.unwrap();

        assert!(backend.sismember("s", "a").await.unwrap());
        assert!(!backend.sismember("s", "z").await.unwrap());
        assert_eq!(
            backend.smembers("s").await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );

        backend.srem("s", "a").await.unwrap();
        assert!(!backend.sismember("s", "a").await.unwrap());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("blog:*", "blog:featured"));
        assert!(glob_match("events:rsvp-check:3:*", "events:rsvp-check:3:u-1"));
        assert!(!glob_match("events:rsvp-check:3:*", "events:rsvp-check:30:u-1"));
        assert!(glob_match("blog:featured", "blog:featured"));
        assert!(!glob_match("blog:*", "events:upcoming"));
        assert!(glob_match("users:profile:*", "users:profile:u-1"));
        assert!(!glob_match("users:profile:*", "users:sessions:u-1"));
    }
}
