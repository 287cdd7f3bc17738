//! Structured log sink.
//!
//! Keeps a bounded in-memory trail of leveled entries, each tagged with the
//! component that wrote it, and mirrors every accepted entry onto the `log`
//! facade. In production mode debug entries are neither retained nor mirrored.

use crate::config::{LogSinkConfig, RuntimeMode};
use crate::error::Result;
use crate::permission::PermissionDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error | LogLevel::Critical => log::Level::Error,
        }
    }
}

/// A single retained log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// The component that wrote the entry (e.g. `permission`, `audit`).
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

/// Filter for [`LogSink::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Minimum level, inclusive.
    pub min_level: Option<LogLevel>,
    pub component: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Bounded, thread-safe log trail.
#[derive(Debug)]
pub struct LogSink {
    capacity: usize,
    mode: RuntimeMode,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogSink {
    /// Create a sink with the given capacity and runtime mode.
    pub fn new(config: &LogSinkConfig, mode: RuntimeMode) -> Self {
        Self {
            capacity: config.capacity.max(1),
            mode,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an entry.
    pub fn log(
        &self,
        level: LogLevel,
        component: &str,
        message: impl Into<String>,
        fields: Option<Value>,
    ) {
        if level == LogLevel::Debug && self.mode.is_production() {
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.into(),
            fields,
        };

        match &entry.fields {
            Some(fields) => log::log!(
                level.as_log_level(),
                "[{}] {} {}",
                entry.component,
                entry.message,
                fields
            ),
            None => log::log!(
                level.as_log_level(),
                "[{}] {}",
                entry.component,
                entry.message
            ),
        }

        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, component, message, None);
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, component, message, None);
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, component, message, None);
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, component, message, None);
    }

    pub fn critical(&self, component: &str, message: impl Into<String>, fields: Option<Value>) {
        self.log(LogLevel::Critical, component, message, fields);
    }

    /// Permission-check side channel. Grants go at debug, denials at info.
    pub fn record_permission_check(
        &self,
        actor_id: &str,
        resource: &str,
        action: &str,
        decision: &PermissionDecision,
    ) {
        let level = if decision.granted {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };
        self.log(
            level,
            "permission",
            format!(
                "{} {} -> {}:{}",
                if decision.granted { "GRANTED" } else { "DENIED" },
                actor_id,
                action,
                resource
            ),
            Some(serde_json::json!({
                "actorId": actor_id,
                "resource": resource,
                "action": action,
                "granted": decision.granted,
                "reason": decision.reason,
                "bypassUsed": decision.bypass_used,
                "appliedRole": decision.applied_role,
            })),
        );
    }

    /// Matching entries, newest first.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let entries = self.lock();
        let matching = entries.iter().rev().filter(|entry| {
            filter.min_level.is_none_or(|min| entry.level >= min)
                && filter
                    .component
                    .as_deref()
                    .is_none_or(|component| entry.component == component)
                && filter.since.is_none_or(|since| entry.timestamp >= since)
        });

        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// All retained entries as a pretty-printed JSON array, oldest first.
    pub fn export_json(&self) -> Result<String> {
        let entries: Vec<LogEntry> = self.lock().iter().cloned().collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock leaves the trail intact, so keep using it.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(capacity: usize, mode: RuntimeMode) -> LogSink {
        LogSink::new(&LogSinkConfig { capacity }, mode)
    }

    #[test]
    fn test_bounded_trail_evicts_oldest() {
        let sink = sink(3, RuntimeMode::Development);
        for i in 0..5 {
            sink.info("test", format!("entry {i}"));
        }

        assert_eq!(sink.len(), 3);
        let entries = sink.query(&LogFilter::default());
        assert_eq!(entries[0].message, "entry 4");
        assert_eq!(entries[2].message, "entry 2");
    }

    #[test]
    fn test_production_drops_debug() {
        let sink = sink(10, RuntimeMode::Production);
        sink.debug("test", "hidden");
        sink.info("test", "shown");
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_query_by_level_and_component() {
        let sink = sink(10, RuntimeMode::Development);
        sink.info("audit", "a");
        sink.warn("protection", "b");
        sink.error("audit", "c");

        let filter = LogFilter {
            min_level: Some(LogLevel::Warn),
            component: Some("audit".to_string()),
            ..LogFilter::default()
        };
        let entries = sink.query(&filter);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "c");
    }

    #[test]
    fn test_permission_side_channel_records_denials() {
        let sink = sink(10, RuntimeMode::Production);
        sink.record_permission_check(
            "u1",
            "work_orders",
            "delete",
            &PermissionDecision::deny("permission denied by role", Some("guest".to_string())),
        );

        let entries = sink.query(&LogFilter::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].component, "permission");
        assert_eq!(entries[0].fields.as_ref().unwrap()["granted"], false);
    }

    #[test]
    fn test_export_json_is_array() {
        let sink = sink(10, RuntimeMode::Development);
        sink.info("test", "one");
        let json = sink.export_json().unwrap();
        let parsed: Vec<LogEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
    }
}
