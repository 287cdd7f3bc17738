//! Risk-scored audit trail.
//!
//! Every state change an embedder reports through [`AuditTrail::log_event`] is
//! scored, sanitized and appended to a bounded ring buffer (oldest entries are
//! evicted first). High and critical entries are queued for escalation; the
//! queue is drained periodically and each entry is handed to an [`AlertSink`].
//!
//! Unlike permission checks, audit logging fails loudly: a record that cannot
//! be stored is an error for the caller.

use crate::config::AuditConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, GuardEvent};
use crate::log_sink::{LogLevel, LogSink};
use crate::metrics::GuardMetrics;
use crate::redact::redact_sensitive;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const COMPONENT: &str = "audit";

/// Limit applied by [`AuditTrail::query`] when the filter sets none.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

const SENSITIVE_ENTITY_TYPES: [&str; 5] = ["user", "company", "security", "permission", "role"];

const HIGH_RISK_ACTIONS: [&str; 7] = [
    "delete",
    "create",
    "login_failed",
    "permission_denied",
    "role_changed",
    "impersonation",
    "data_export",
];

const CRITICAL_ACTIONS: [&str; 5] = [
    "delete_user",
    "delete_company",
    "security_breach",
    "unauthorized_access",
    "data_breach",
];

/// Severity assigned to an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map an additive risk score onto a level.
    pub fn from_score(score: u32) -> Self {
        match score {
            70.. => RiskLevel::Critical,
            40..=69 => RiskLevel::High,
            20..=39 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// High and critical entries are escalated.
    pub fn requires_escalation(&self) -> bool {
        *self >= RiskLevel::High
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub performed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            performed_by: performed_by.into(),
            previous_state: None,
            new_state: None,
            reason: None,
            metadata: None,
        }
    }

    pub fn with_previous_state(mut self, state: Value) -> Self {
        self.previous_state = Some(state);
        self
    }

    pub fn with_new_state(mut self, state: Value) -> Self {
        self.new_state = Some(state);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the performer acted under the bypass role, judged by the
    /// performer name or the `role`/`performerRole` metadata keys.
    fn performed_by_bypass(&self, bypass_role: &str) -> bool {
        if self.performed_by.eq_ignore_ascii_case(bypass_role) {
            return true;
        }
        self.metadata.as_ref().is_some_and(|metadata| {
            ["role", "performerRole"].iter().any(|key| {
                metadata
                    .get(key)
                    .and_then(Value::as_str)
                    .is_some_and(|role| role.eq_ignore_ascii_case(bypass_role))
            })
        })
    }
}

/// A stored, immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub performed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub risk_level: RiskLevel,
}

/// Additive risk score for an event. Substring matching is case-insensitive.
pub fn risk_score(event: &AuditEvent, bypass_role: &str) -> u32 {
    let entity_type = event.entity_type.to_lowercase();
    let action = event.action.to_lowercase();
    let mut score = 0;

    if SENSITIVE_ENTITY_TYPES.contains(&entity_type.as_str()) {
        score += 20;
    }
    if HIGH_RISK_ACTIONS.iter().any(|marker| action.contains(marker)) {
        score += 30;
    }
    if CRITICAL_ACTIONS.iter().any(|marker| action.contains(marker)) {
        score += 50;
    }
    if event.performed_by_bypass(bypass_role) {
        score += 15;
    }

    score
}

pub fn assess_risk(event: &AuditEvent, bypass_role: &str) -> RiskLevel {
    RiskLevel::from_score(risk_score(event, bypass_role))
}

/// Destination for escalated audit entries (paging, SIEM, chat).
pub trait AlertSink: Send + Sync {
    fn alert(&self, entry: &AuditEntry);
}

/// Alert sink that writes escalations to the structured log sink.
#[derive(Debug, Clone)]
pub struct LogAlertSink {
    log_sink: Arc<LogSink>,
}

impl LogAlertSink {
    pub fn new(log_sink: Arc<LogSink>) -> Self {
        Self { log_sink }
    }
}

impl AlertSink for LogAlertSink {
    fn alert(&self, entry: &AuditEntry) {
        let level = match entry.risk_level {
            RiskLevel::Critical => LogLevel::Critical,
            _ => LogLevel::Error,
        };
        self.log_sink.log(
            level,
            "alert",
            format!(
                "ESCALATED {} audit event: {} on {}/{} by {}",
                entry.risk_level, entry.action, entry.entity_type, entry.entity_id, entry.performed_by
            ),
            Some(json!({ "auditId": entry.id, "riskLevel": entry.risk_level })),
        );
    }
}

/// Filter for [`AuditTrail::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub performed_by: Option<String>,
    pub risk_level: Option<RiskLevel>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub offset: usize,
    /// Defaults to [`DEFAULT_QUERY_LIMIT`].
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.entity_type
            .as_deref()
            .is_none_or(|v| entry.entity_type == v)
            && self.entity_id.as_deref().is_none_or(|v| entry.entity_id == v)
            && self.action.as_deref().is_none_or(|v| entry.action == v)
            && self
                .performed_by
                .as_deref()
                .is_none_or(|v| entry.performed_by == v)
            && self.risk_level.is_none_or(|v| entry.risk_level == v)
            && self.from.is_none_or(|from| entry.timestamp >= from)
            && self.to.is_none_or(|to| entry.timestamp <= to)
    }
}

/// Export encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Options for [`AuditTrail::compliance_report`].
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// How many of the most active actors to list.
    pub top_n: usize,
    /// How many recent critical entries to include.
    pub recent_critical: usize,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            recent_critical: 10,
            from: None,
            to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorActivity {
    pub actor_id: String,
    pub event_count: usize,
}

/// Summary of the retained trail for compliance review.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub total_events: usize,
    pub critical_events: usize,
    pub high_risk_events: usize,
    pub distinct_actors: usize,
    pub distinct_entity_types: usize,
    pub risk_distribution: BTreeMap<RiskLevel, usize>,
    pub top_actors: Vec<ActorActivity>,
    /// Newest first.
    pub recent_critical_events: Vec<AuditEntry>,
}

/// The audit trail store.
pub struct AuditTrail {
    config: AuditConfig,
    entries: Mutex<VecDeque<AuditEntry>>,
    escalations: Mutex<VecDeque<AuditEntry>>,
    alert_sink: Arc<dyn AlertSink>,
    log_sink: Arc<LogSink>,
    events: Arc<EventBus>,
    metrics: Arc<GuardMetrics>,
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("capacity", &self.config.capacity)
            .field("len", &self.len())
            .field("pending_escalations", &self.pending_escalations())
            .finish()
    }
}

impl AuditTrail {
    pub fn new(
        config: AuditConfig,
        alert_sink: Arc<dyn AlertSink>,
        log_sink: Arc<LogSink>,
        events: Arc<EventBus>,
        metrics: Arc<GuardMetrics>,
    ) -> Self {
        Self {
            config,
            entries: Mutex::new(VecDeque::new()),
            escalations: Mutex::new(VecDeque::new()),
            alert_sink,
            log_sink,
            events,
            metrics,
        }
    }

    /// Score, sanitize and store an event.
    pub fn log_event(&self, event: AuditEvent) -> Result<AuditEntry> {
        for (field, value) in [
            ("entity type", &event.entity_type),
            ("entity id", &event.entity_id),
            ("action", &event.action),
            ("performer", &event.performed_by),
        ] {
            if value.trim().is_empty() {
                return Err(Error::AuditFailure(format!("{field} must not be empty")));
            }
        }

        let risk_level = assess_risk(&event, &self.config.bypass_role);
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            previous_state: event.previous_state.as_ref().map(redact_sensitive),
            new_state: event.new_state.as_ref().map(redact_sensitive),
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            action: event.action,
            performed_by: event.performed_by,
            reason: event.reason,
            metadata: event.metadata,
            risk_level,
        };

        // Both locks are held before anything is stored, so an error means
        // neither the record nor its escalation was kept.
        {
            let mut escalations = if risk_level.requires_escalation() {
                Some(lock_for_write(&self.escalations, "escalation queue")?)
            } else {
                None
            };
            let mut entries = lock_for_write(&self.entries, "audit store")?;
            while entries.len() >= self.config.capacity.max(1) {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
            if let Some(queue) = escalations.as_mut() {
                queue.push_back(entry.clone());
            }
        }
        self.metrics.record_audit_entry();

        if risk_level == RiskLevel::Critical {
            self.log_sink.critical(
                COMPONENT,
                format!(
                    "CRITICAL audit event: {} on {}/{} by {}",
                    entry.action, entry.entity_type, entry.entity_id, entry.performed_by
                ),
                Some(json!({ "auditId": entry.id, "reason": entry.reason })),
            );
        } else {
            self.log_sink.debug(
                COMPONENT,
                format!(
                    "Recorded {} on {}/{} ({})",
                    entry.action, entry.entity_type, entry.entity_id, risk_level
                ),
            );
        }

        Ok(entry)
    }

    /// Hand every queued escalation to the alert sink. Returns how many were
    /// delivered.
    pub fn drain_escalations(&self) -> usize {
        let pending: Vec<AuditEntry> = lock_recovering(&self.escalations).drain(..).collect();

        for entry in &pending {
            self.alert_sink.alert(entry);
            self.metrics.record_escalation();
            self.events.emit(GuardEvent::AuditEscalated {
                entry_id: entry.id.to_string(),
                action: entry.action.clone(),
                risk_level: entry.risk_level,
            });
        }

        if !pending.is_empty() {
            log::info!("Escalated {} audit entries", pending.len());
        }
        pending.len()
    }

    /// Drain the escalation queue on the configured interval until the
    /// returned task is aborted.
    pub fn spawn_escalation_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let trail = Arc::clone(self);
        let period = Duration::from_millis(self.config.escalation_interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                trail.drain_escalations();
            }
        })
    }

    /// Matching entries, newest first, after `offset`, at most `limit`.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        lock_recovering(&self.entries)
            .iter()
            .rev()
            .filter(|entry| filter.matches(entry))
            .skip(filter.offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every retained entry for one record, newest first.
    pub fn entity_history(&self, entity_type: &str, entity_id: &str) -> Vec<AuditEntry> {
        self.query(&AuditFilter {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            limit: Some(usize::MAX),
            ..AuditFilter::default()
        })
    }

    /// Every retained entry performed by one actor, newest first.
    pub fn actor_activity(&self, actor_id: &str) -> Vec<AuditEntry> {
        self.query(&AuditFilter {
            performed_by: Some(actor_id.to_string()),
            limit: Some(usize::MAX),
            ..AuditFilter::default()
        })
    }

    /// Serialize the whole trail, oldest first.
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        let entries: Vec<AuditEntry> = lock_recovering(&self.entries).iter().cloned().collect();

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&entries)?),
            ExportFormat::Csv => {
                let mut csv = String::from(
                    "timestamp,entityType,entityId,action,performedBy,riskLevel,reason,metadata\n",
                );
                for entry in &entries {
                    let metadata = match &entry.metadata {
                        Some(metadata) => serde_json::to_string(metadata)?,
                        None => String::new(),
                    };
                    csv.push_str(&format!(
                        "{},{},{},{},{},{},{},{}\n",
                        entry.timestamp.to_rfc3339(),
                        entry.entity_type,
                        entry.entity_id,
                        entry.action,
                        entry.performed_by,
                        entry.risk_level,
                        quote_csv(entry.reason.as_deref().unwrap_or_default()),
                        quote_csv(&metadata),
                    ));
                }
                Ok(csv)
            }
        }
    }

    pub fn compliance_report(&self, options: &ReportOptions) -> ComplianceReport {
        let entries = lock_recovering(&self.entries);
        let in_range: Vec<&AuditEntry> = entries
            .iter()
            .filter(|entry| {
                options.from.is_none_or(|from| entry.timestamp >= from)
                    && options.to.is_none_or(|to| entry.timestamp <= to)
            })
            .collect();

        let mut risk_distribution: BTreeMap<RiskLevel, usize> = [
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
            RiskLevel::Critical,
        ]
        .into_iter()
        .map(|level| (level, 0))
        .collect();
        let mut per_actor: HashMap<&str, usize> = HashMap::new();
        let mut entity_types: HashSet<&str> = HashSet::new();

        for entry in &in_range {
            *risk_distribution.entry(entry.risk_level).or_default() += 1;
            *per_actor.entry(entry.performed_by.as_str()).or_default() += 1;
            entity_types.insert(entry.entity_type.as_str());
        }

        let mut top_actors: Vec<ActorActivity> = per_actor
            .iter()
            .map(|(actor, count)| ActorActivity {
                actor_id: actor.to_string(),
                event_count: *count,
            })
            .collect();
        top_actors.sort_by(|a, b| {
            b.event_count
                .cmp(&a.event_count)
                .then_with(|| a.actor_id.cmp(&b.actor_id))
        });
        top_actors.truncate(options.top_n);

        let recent_critical_events = in_range
            .iter()
            .rev()
            .filter(|entry| entry.risk_level == RiskLevel::Critical)
            .take(options.recent_critical)
            .map(|entry| (*entry).clone())
            .collect();

        ComplianceReport {
            generated_at: Utc::now(),
            total_events: in_range.len(),
            critical_events: risk_distribution[&RiskLevel::Critical],
            high_risk_events: risk_distribution[&RiskLevel::High],
            distinct_actors: per_actor.len(),
            distinct_entity_types: entity_types.len(),
            risk_distribution,
            top_actors,
            recent_critical_events,
        }
    }

    pub fn len(&self) -> usize {
        lock_recovering(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_recovering(&self.entries).is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn pending_escalations(&self) -> usize {
        lock_recovering(&self.escalations).len()
    }
}

/// Writes refuse a poisoned store so that callers learn the record was lost.
fn lock_for_write<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| Error::AuditFailure(format!("{what} is poisoned")))
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn quote_csv(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
