//! TTL- and capacity-bounded response cache.
//!
//! Caches prior response payloads for idempotent GET-style requests, keyed by
//! a request fingerprint computed at the HTTP boundary. Entries expire after
//! their TTL; insertion past capacity evicts the oldest-created entry (not
//! LRU). Cache operations never fail; anything that cannot be cached simply
//! isn't.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::Clock;

pub type HeadersMap = BTreeMap<String, String>;

/// One cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub headers: HeadersMap,
    pub status_code: u16,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Age in whole seconds at `now`, for the `Age` response header.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(max_entries: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            default_ttl,
            clock,
        }
    }

    /// Fetch a fresh entry; an expired one is evicted and reported absent.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Insert or overwrite an entry.
    ///
    /// Expired entries are purged first; if the cache is still at capacity the
    /// single oldest-created entry is evicted.
    pub fn set(
        &self,
        key: &str,
        payload: Bytes,
        headers: HeadersMap,
        status_code: u16,
        ttl: Option<Duration>,
    ) {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut entries = self.entries.lock().unwrap();

        entries.retain(|_, entry| !entry.is_expired(now));

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(key = %oldest, "Evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                headers,
                status_code,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Remove every entry whose key starts with `prefix`; returns the count.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

/// Deterministic cache key over method, path and the optional variance inputs.
///
/// The prefix keeps the path readable so `invalidate` can target a route
/// subtree; the sha256 suffix folds in the varying parts.
pub fn fingerprint(
    method: &str,
    path: &str,
    query: Option<&str>,
    identity: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b":");
    hasher.update(path.as_bytes());
    if let Some(query) = query {
        hasher.update(b"?");
        hasher.update(query.as_bytes());
    }
    if let Some(identity) = identity {
        hasher.update(b"@");
        hasher.update(identity.as_bytes());
    }
    format!("{}:{:x}", path, hasher.finalize())
}
