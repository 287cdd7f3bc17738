//! Synchronous event bus.
//!
//! Business modules publish domain events (a work order was created, an
//! impersonation session started) without knowing who listens. Events are a
//! closed set of typed variants; handlers subscribe per [`EventKind`].
//!
//! Dispatch is synchronous and in registration order. A handler that returns
//! an error or panics is logged and skipped; the remaining handlers still run.

use crate::audit::RiskLevel;
use crate::log_sink::LogSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Every event the guard core knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardEvent {
    /// Something upstream detected a breach or tampering attempt.
    SecurityBreachDetected {
        actor_id: Option<String>,
        description: String,
    },
    /// A rate-limit window rejected a request.
    RateLimitExceeded {
        actor_id: String,
        action_class: String,
        limit: u64,
    },
    /// Input validation found a suspicious pattern.
    SuspiciousInput {
        actor_id: Option<String>,
        reason: String,
    },
    /// An upload failed screening.
    FileRejected { filename: String, reason: String },
    /// A permission check was denied.
    PermissionDenied {
        actor_id: String,
        resource: String,
        action: String,
        reason: String,
    },
    /// An actor began testing under another role.
    ImpersonationStarted {
        actor_id: String,
        role: String,
        organization_type: Option<String>,
    },
    /// A permission check ran under an impersonated role.
    ImpersonationActive { actor_id: String, role: String },
    /// An impersonation session ended.
    ImpersonationEnded { actor_id: String },
    WorkOrderCreated {
        work_order_id: String,
        created_by: String,
    },
    WorkOrderUpdated {
        work_order_id: String,
        updated_by: String,
        status: Option<String>,
    },
    WorkOrderAssigned {
        work_order_id: String,
        assigned_to: String,
        assigned_by: String,
    },
    /// A high or critical audit entry was handed to the alert sink.
    AuditEscalated {
        entry_id: String,
        action: String,
        risk_level: RiskLevel,
    },
}

/// Discriminant of [`GuardEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SecurityBreachDetected,
    RateLimitExceeded,
    SuspiciousInput,
    FileRejected,
    PermissionDenied,
    ImpersonationStarted,
    ImpersonationActive,
    ImpersonationEnded,
    WorkOrderCreated,
    WorkOrderUpdated,
    WorkOrderAssigned,
    AuditEscalated,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 12] = [
        EventKind::SecurityBreachDetected,
        EventKind::RateLimitExceeded,
        EventKind::SuspiciousInput,
        EventKind::FileRejected,
        EventKind::PermissionDenied,
        EventKind::ImpersonationStarted,
        EventKind::ImpersonationActive,
        EventKind::ImpersonationEnded,
        EventKind::WorkOrderCreated,
        EventKind::WorkOrderUpdated,
        EventKind::WorkOrderAssigned,
        EventKind::AuditEscalated,
    ];

    /// Dotted wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::SecurityBreachDetected => "security.breach_detected",
            EventKind::RateLimitExceeded => "security.rate_limit_exceeded",
            EventKind::SuspiciousInput => "security.suspicious_input",
            EventKind::FileRejected => "security.file_rejected",
            EventKind::PermissionDenied => "permission.denied",
            EventKind::ImpersonationStarted => "role.impersonation_started",
            EventKind::ImpersonationActive => "role.impersonation_active",
            EventKind::ImpersonationEnded => "role.impersonation_ended",
            EventKind::WorkOrderCreated => "work_order.created",
            EventKind::WorkOrderUpdated => "work_order.updated",
            EventKind::WorkOrderAssigned => "work_order.assigned",
            EventKind::AuditEscalated => "audit.escalated",
        }
    }

    /// Whether the event belongs to the security family.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            EventKind::SecurityBreachDetected
                | EventKind::RateLimitExceeded
                | EventKind::SuspiciousInput
                | EventKind::FileRejected
                | EventKind::PermissionDenied
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl GuardEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GuardEvent::SecurityBreachDetected { .. } => EventKind::SecurityBreachDetected,
            GuardEvent::RateLimitExceeded { .. } => EventKind::RateLimitExceeded,
            GuardEvent::SuspiciousInput { .. } => EventKind::SuspiciousInput,
            GuardEvent::FileRejected { .. } => EventKind::FileRejected,
            GuardEvent::PermissionDenied { .. } => EventKind::PermissionDenied,
            GuardEvent::ImpersonationStarted { .. } => EventKind::ImpersonationStarted,
            GuardEvent::ImpersonationActive { .. } => EventKind::ImpersonationActive,
            GuardEvent::ImpersonationEnded { .. } => EventKind::ImpersonationEnded,
            GuardEvent::WorkOrderCreated { .. } => EventKind::WorkOrderCreated,
            GuardEvent::WorkOrderUpdated { .. } => EventKind::WorkOrderUpdated,
            GuardEvent::WorkOrderAssigned { .. } => EventKind::WorkOrderAssigned,
            GuardEvent::AuditEscalated { .. } => EventKind::AuditEscalated,
        }
    }
}

/// An event as delivered to handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    pub event_name: &'static str,
    pub timestamp: DateTime<Utc>,
    pub event: GuardEvent,
}

/// Error a handler may report; logged by the bus, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback.
pub type EventHandler =
    Arc<dyn Fn(&EventEnvelope) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Token returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Publish/subscribe hub shared by all components.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(HandlerId, EventHandler)>>>,
    next_id: AtomicU64,
    log_sink: Arc<LogSink>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("registered_events", &self.registered_events())
            .finish()
    }
}

impl EventBus {
    /// Create a bus that reports handler failures to `log_sink`.
    pub fn new(log_sink: Arc<LogSink>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            log_sink,
        }
    }

    /// Subscribe a handler to one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&EventEnvelope) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: EventHandler = Arc::new(handler);
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler. Returns false if it was not subscribed to `kind`.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Deliver an event to its subscribers. Returns how many handlers
    /// completed without error.
    pub fn emit(&self, event: GuardEvent) -> usize {
        let kind = event.kind();

        // Snapshot so handlers may subscribe or unsubscribe while we dispatch.
        let subscribers: Vec<(HandlerId, EventHandler)> = {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match handlers.get(&kind) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        let envelope = EventEnvelope {
            event_name: kind.name(),
            timestamp: Utc::now(),
            event,
        };

        let mut delivered = 0;
        for (id, handler) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| handler(&envelope))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => self.log_sink.error(
                    "events",
                    format!("Handler {:?} for '{}' failed: {}", id, kind, e),
                ),
                Err(_) => self.log_sink.error(
                    "events",
                    format!("Handler {:?} for '{}' panicked", id, kind),
                ),
            }
        }

        delivered
    }

    /// Kinds that currently have at least one handler, in declaration order.
    pub fn registered_events(&self) -> Vec<EventKind> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut kinds: Vec<EventKind> = handlers
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
