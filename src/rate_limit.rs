//! Per-actor fixed-window rate limiting.
//!
//! Each `(actor, action class)` pair has its own window. The first request
//! opens a window; once `now` passes the window's reset time the next request
//! starts a fresh one. A request arriving when the window is full is rejected
//! without being counted.

use crate::config::{RateLimitConfig, RateLimitRule};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Window state for one actor and action class.
#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u64,
    reset_time: Instant,
    first_request_time: Instant,
}

impl RateLimitWindow {
    fn open(now: Instant, rule: &RateLimitRule) -> Self {
        Self {
            count: 0,
            reset_time: now + rule.window(),
            first_request_time: now,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    /// Requests counted in the current window, this one included if allowed.
    pub count: u64,
    pub limit: u64,
    /// Time until the window resets.
    pub retry_after: Duration,
}

/// Current usage of one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub actor_id: String,
    pub action_class: String,
    pub count: u64,
    pub limit: u64,
    /// Milliseconds since the window opened.
    pub window_age_ms: u64,
}

/// Fixed-window rate limiter keyed by actor and action class.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<(String, String), RateLimitWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Count a request from `actor_id` in `action_class`.
    pub fn check(&self, actor_id: &str, action_class: &str) -> RateLimitOutcome {
        self.check_at(actor_id, action_class, Instant::now())
    }

    pub(crate) fn check_at(
        &self,
        actor_id: &str,
        action_class: &str,
        now: Instant,
    ) -> RateLimitOutcome {
        let Some(rule) = self.config.rule_for(action_class) else {
            // no rule and no default: nothing to enforce
            return RateLimitOutcome {
                allowed: true,
                count: 0,
                limit: u64::MAX,
                retry_after: Duration::ZERO,
            };
        };

        // The entry guard holds the shard lock, so the read-modify-write
        // below is atomic per key.
        let mut window = self
            .windows
            .entry((actor_id.to_string(), action_class.to_string()))
            .or_insert_with(|| RateLimitWindow::open(now, &rule));

        if now > window.reset_time {
            *window = RateLimitWindow::open(now, &rule);
        }

        let allowed = window.count < rule.max_requests;
        if allowed {
            window.count += 1;
        }

        RateLimitOutcome {
            allowed,
            count: window.count,
            limit: rule.max_requests,
            retry_after: window.reset_time.saturating_duration_since(now),
        }
    }

    /// Usage of a live window, if one exists.
    pub fn usage(&self, actor_id: &str, action_class: &str) -> Option<WindowUsage> {
        let now = Instant::now();
        let key = (actor_id.to_string(), action_class.to_string());
        let window = self.windows.get(&key)?;
        if now > window.reset_time {
            return None;
        }
        Some(self.describe(&key, &window, now))
    }

    /// Forget every window of an actor. Returns how many were removed.
    pub fn reset_actor(&self, actor_id: &str) -> usize {
        let before = self.windows.len();
        self.windows.retain(|(actor, _), _| actor != actor_id);
        before.saturating_sub(self.windows.len())
    }

    /// Remove windows whose reset time has passed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub(crate) fn cleanup_expired_at(&self, now: Instant) -> usize {
        let expired: Vec<(String, String)> = self
            .windows
            .iter()
            .filter(|entry| now > entry.value().reset_time)
            .map(|entry| entry.key().clone())
            .collect();

        let removed = expired
            .into_iter()
            .filter(|key| {
                self.windows
                    .remove_if(key, |_, window| now > window.reset_time)
                    .is_some()
            })
            .count();

        if removed > 0 {
            log::debug!("Removed {removed} expired rate-limit windows");
        }
        removed
    }

    /// Sweep expired windows on the configured interval until the returned
    /// task is aborted.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = Duration::from_millis(self.config.cleanup_interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                limiter.cleanup_expired();
            }
        })
    }

    pub fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let windows: Vec<WindowUsage> = self
            .windows
            .iter()
            .filter(|entry| now <= entry.value().reset_time)
            .map(|entry| self.describe(entry.key(), entry.value(), now))
            .collect();

        RateLimitStats {
            tracked_windows: self.windows.len(),
            windows,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn describe(
        &self,
        (actor_id, action_class): &(String, String),
        window: &RateLimitWindow,
        now: Instant,
    ) -> WindowUsage {
        WindowUsage {
            actor_id: actor_id.clone(),
            action_class: action_class.clone(),
            count: window.count,
            limit: self
                .config
                .rule_for(action_class)
                .map_or(u64::MAX, |rule| rule.max_requests),
            window_age_ms: now.duration_since(window.first_request_time).as_millis() as u64,
        }
    }
}

/// Rate limiting statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    /// Windows held in memory, live or not yet swept.
    pub tracked_windows: usize,
    /// Live windows.
    pub windows: Vec<WindowUsage>,
}

impl RateLimitStats {
    /// Actors with a window at or above `threshold_percentage` of its limit.
    pub fn actors_approaching_limit(&self, threshold_percentage: f64) -> Vec<String> {
        let mut actors: Vec<String> = self
            .windows
            .iter()
            .filter(|usage| {
                usage.limit != 0
                    && (usage.count as f64 / usage.limit as f64) * 100.0 >= threshold_percentage
            })
            .map(|usage| usage.actor_id.clone())
            .collect();
        actors.sort();
        actors.dedup();
        actors
    }
}
