//! Short-lived cache of permission decisions.
//!
//! Expiry is checked lazily when an entry is read; an expired entry is
//! removed on that read. [`DecisionCache::cleanup_expired`] exists only to
//! reclaim memory from keys that are never read again.

use crate::context::PermissionContext;
use crate::permission::PermissionDecision;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Cache key: who, on what, doing what, under which context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub actor_id: String,
    pub resource: String,
    pub action: String,
    /// Empty when no context was supplied.
    pub scope: String,
}

impl DecisionKey {
    pub fn new(
        actor_id: &str,
        resource: &str,
        action: &str,
        context: Option<&PermissionContext>,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            scope: context.map(PermissionContext::cache_scope).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedDecision {
    decision: PermissionDecision,
    expires_at: Instant,
}

/// TTL-bounded decision cache.
#[derive(Debug)]
pub struct DecisionCache {
    entries: DashMap<DecisionKey, CachedDecision>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// A live decision for `key`, if any.
    pub fn get(&self, key: &DecisionKey) -> Option<PermissionDecision> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &DecisionKey, now: Instant) -> Option<PermissionDecision> {
        if let Some(entry) = self.entries.get(key) {
            if now < entry.expires_at {
                return Some(entry.decision.clone());
            }
            drop(entry); // release the shard lock before removing
            self.entries
                .remove_if(key, |_, cached| now >= cached.expires_at);
        }
        None
    }

    pub fn insert(&self, key: DecisionKey, decision: PermissionDecision) {
        self.entries.insert(
            key,
            CachedDecision {
                decision,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every decision made for an actor.
    pub fn invalidate_actor(&self, actor_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.actor_id != actor_id);
        before.saturating_sub(self.entries.len())
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub(crate) fn cleanup_expired_at(&self, now: Instant) -> usize {
        let expired: Vec<DecisionKey> = self
            .entries
            .iter()
            .filter(|entry| now >= entry.value().expires_at)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| {
                self.entries
                    .remove_if(key, |_, cached| now >= cached.expires_at)
                    .is_some()
            })
            .count()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let expired_entries = self
            .entries
            .iter()
            .filter(|entry| now >= entry.value().expires_at)
            .count();

        CacheStats {
            total_entries: self.entries.len(),
            expired_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Entries past their deadline that have not been read or swept yet.
    pub expired_entries: usize,
    pub ttl_seconds: u64,
}
