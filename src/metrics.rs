//! Counters for guard operations.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe operation counters shared by every component.
#[derive(Debug, Default)]
pub struct GuardMetrics {
    pub permission_checks: AtomicU64,
    pub permissions_granted: AtomicU64,
    pub permissions_denied: AtomicU64,
    pub bypass_grants: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub rate_limited: AtomicU64,
    pub validation_rejections: AtomicU64,
    pub uploads_rejected: AtomicU64,
    pub audit_entries: AtomicU64,
    pub audit_escalations: AtomicU64,
    /// Slowest permission check seen per latency bucket.
    permission_check_durations: DashMap<&'static str, Duration>,
    /// Error counts by type.
    error_counts: DashMap<String, AtomicU64>,
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a computed (uncached) or cached permission decision.
    pub fn record_decision(&self, granted: bool, bypass_used: bool) {
        self.permission_checks.fetch_add(1, Ordering::Relaxed);
        if granted {
            self.permissions_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.permissions_denied.fetch_add(1, Ordering::Relaxed);
        }
        if bypass_used {
            self.bypass_grants.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_check_duration(&self, duration: Duration) {
        self.permission_check_durations
            .entry(duration_to_bucket(duration))
            .and_modify(|existing| {
                if duration > *existing {
                    *existing = duration;
                }
            })
            .or_insert(duration);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_rejection(&self) {
        self.validation_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_rejection(&self) {
        self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_entry(&self) {
        self.audit_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_escalation(&self) {
        self.audit_escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error_type: &str) {
        self.error_counts
            .entry(error_type.to_string())
            .and_modify(|count| {
                count.fetch_add(1, Ordering::Relaxed);
            })
            .or_insert_with(|| AtomicU64::new(1));
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            permission_checks: self.permission_checks.load(Ordering::Relaxed),
            permissions_granted: self.permissions_granted.load(Ordering::Relaxed),
            permissions_denied: self.permissions_denied.load(Ordering::Relaxed),
            bypass_grants: self.bypass_grants.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_ratio: self.cache_hit_ratio(),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            audit_entries: self.audit_entries.load(Ordering::Relaxed),
            audit_escalations: self.audit_escalations.load(Ordering::Relaxed),
            slowest_check_by_bucket: self
                .permission_check_durations
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().as_micros() as u64))
                .collect(),
            error_counts: self
                .error_counts
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

fn duration_to_bucket(duration: Duration) -> &'static str {
    match duration.as_micros() {
        0..=99 => "0-99us",
        100..=999 => "100-999us",
        1000..=9999 => "1-9ms",
        10000..=99999 => "10-99ms",
        100000..=999999 => "100-999ms",
        _ => "1s+",
    }
}

/// Serializable summary of [`GuardMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub permission_checks: u64,
    pub permissions_granted: u64,
    pub permissions_denied: u64,
    pub bypass_grants: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub rate_limited: u64,
    pub validation_rejections: u64,
    pub uploads_rejected: u64,
    pub audit_entries: u64,
    pub audit_escalations: u64,
    /// Slowest check per latency bucket, in microseconds.
    pub slowest_check_by_bucket: HashMap<String, u64>,
    pub error_counts: HashMap<String, u64>,
}

/// Records a permission check's duration when dropped.
pub struct CheckTimer<'a> {
    start: Instant,
    metrics: &'a GuardMetrics,
}

impl<'a> CheckTimer<'a> {
    pub fn start(metrics: &'a GuardMetrics) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }
}

impl Drop for CheckTimer<'_> {
    fn drop(&mut self) {
        self.metrics.record_check_duration(self.start.elapsed());
    }
}
