//! Composition root.
//!
//! [`GuardBuilder`] constructs the components in dependency order (log sink,
//! event bus, audit trail, protective controls, permission engine), wires the
//! baseline event subscriptions and hands back a [`Guard`] owning all of them.
//! The guard also owns the background sweeps and the shutdown sequence.

use crate::actor::ActorDirectory;
use crate::audit::{AlertSink, AuditTrail, LogAlertSink};
use crate::config::GuardConfig;
use crate::engine::PermissionEngine;
use crate::error::Result;
use crate::events::{EventBus, EventKind, GuardEvent};
use crate::log_sink::{LogLevel, LogSink};
use crate::metrics::GuardMetrics;
use crate::protection::ProtectiveControls;
use crate::role::RoleRegistry;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::task::JoinHandle;

const COMPONENT: &str = "bootstrap";

static FAULT_HANDLERS: Once = Once::new();

/// Severity with which the baseline subscription records an event kind.
/// `None` for kinds whose producer already writes a log entry.
pub fn baseline_level(kind: EventKind) -> Option<LogLevel> {
    match kind {
        EventKind::SecurityBreachDetected => Some(LogLevel::Critical),
        EventKind::RateLimitExceeded | EventKind::SuspiciousInput | EventKind::FileRejected => {
            Some(LogLevel::Warn)
        }
        EventKind::ImpersonationStarted
        | EventKind::ImpersonationActive
        | EventKind::ImpersonationEnded
        | EventKind::WorkOrderCreated
        | EventKind::WorkOrderUpdated
        | EventKind::WorkOrderAssigned => Some(LogLevel::Info),
        EventKind::PermissionDenied | EventKind::AuditEscalated => None,
    }
}

/// Builder for [`Guard`].
pub struct GuardBuilder<D: ActorDirectory> {
    directory: D,
    config: GuardConfig,
    roles: Option<RoleRegistry>,
    alert_sink: Option<Arc<dyn AlertSink>>,
}

impl<D: ActorDirectory> GuardBuilder<D> {
    pub fn new(directory: D) -> Self {
        Self {
            directory,
            config: GuardConfig::default(),
            roles: None,
            alert_sink: None,
        }
    }

    pub fn config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom role table instead of the stock one.
    pub fn roles(mut self, roles: RoleRegistry) -> Self {
        self.roles = Some(roles);
        self
    }

    /// Where escalated audit entries go. Defaults to the log sink.
    pub fn alert_sink(mut self, alert_sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(alert_sink);
        self
    }

    pub fn build(self) -> Result<Guard<D>> {
        let config = self.config;
        config.validate()?;

        let log_sink = Arc::new(LogSink::new(&config.log_sink, config.mode));
        let events = Arc::new(EventBus::new(log_sink.clone()));
        let metrics = Arc::new(GuardMetrics::new());

        let alert_sink = self
            .alert_sink
            .unwrap_or_else(|| Arc::new(LogAlertSink::new(log_sink.clone())));
        // risk scoring must agree with the engine on who bypasses checks
        let mut audit_config = config.audit.clone();
        audit_config.bypass_role = config.permissions.bypass_role.clone();
        let audit = Arc::new(AuditTrail::new(
            audit_config,
            alert_sink,
            log_sink.clone(),
            events.clone(),
            metrics.clone(),
        ));

        let protection = Arc::new(ProtectiveControls::new(
            &config,
            log_sink.clone(),
            events.clone(),
            metrics.clone(),
        )?);

        let roles = match self.roles {
            Some(roles) => roles,
            None => RoleRegistry::with_defaults(
                &config.permissions.bypass_role,
                &config.permissions.default_role,
            )?,
        };
        let permissions = Arc::new(PermissionEngine::new(
            self.directory,
            roles,
            config.permissions.clone(),
            log_sink.clone(),
            events.clone(),
            metrics.clone(),
        )?);

        let guard = Guard {
            config,
            log_sink,
            events,
            metrics,
            audit,
            protection,
            permissions,
            tasks: Mutex::new(Vec::new()),
        };
        guard.register_baseline_subscriptions();
        guard.log_sink.info(
            COMPONENT,
            format!("Guard initialised in {:?} mode", guard.config.mode),
        );

        Ok(guard)
    }
}

/// The wired guard core.
pub struct Guard<D: ActorDirectory> {
    config: GuardConfig,
    log_sink: Arc<LogSink>,
    events: Arc<EventBus>,
    metrics: Arc<GuardMetrics>,
    audit: Arc<AuditTrail>,
    protection: Arc<ProtectiveControls>,
    permissions: Arc<PermissionEngine<D>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: ActorDirectory> std::fmt::Debug for Guard<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("mode", &self.config.mode)
            .field("permissions", &self.permissions)
            .field("audit", &self.audit)
            .finish()
    }
}

impl<D: ActorDirectory> Guard<D> {
    /// Build a guard with the stock role table.
    pub fn bootstrap(
        config: GuardConfig,
        directory: D,
        alert_sink: Option<Arc<dyn AlertSink>>,
    ) -> Result<Self> {
        let builder = GuardBuilder::new(directory).config(config);
        match alert_sink {
            Some(alert_sink) => builder.alert_sink(alert_sink).build(),
            None => builder.build(),
        }
    }

    pub fn builder(directory: D) -> GuardBuilder<D> {
        GuardBuilder::new(directory)
    }

    pub fn permissions(&self) -> &Arc<PermissionEngine<D>> {
        &self.permissions
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn protection(&self) -> &Arc<ProtectiveControls> {
        &self.protection
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn log_sink(&self) -> &Arc<LogSink> {
        &self.log_sink
    }

    pub fn metrics(&self) -> &Arc<GuardMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Route panics to the log sink at critical severity, then to the
    /// previously installed hook. Installs at most once per process.
    ///
    /// The hook runs before any unwinding, so event handler panics that the
    /// [`EventBus`] goes on to isolate are recorded here too.
    pub fn install_fault_handlers(&self) {
        let log_sink = self.log_sink.clone();
        FAULT_HANDLERS.call_once(move || {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}", l.file(), l.line()));
                log_sink.critical(
                    "process",
                    format!("Panic: {info}"),
                    Some(serde_json::json!({ "location": location })),
                );
                previous(info);
            }));
        });
    }

    /// Number of background tasks currently owned by the guard.
    pub fn background_task_count(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Abort the background tasks, deliver pending escalations and log
    /// completion.
    pub fn shutdown(&self) {
        self.log_sink.info(COMPONENT, "Shutting down");

        for task in self.lock_tasks().drain(..) {
            task.abort();
        }

        let escalated = self.audit.drain_escalations();
        self.log_sink.info(
            COMPONENT,
            format!("Shutdown complete ({escalated} pending escalations delivered)"),
        );
    }

    fn register_baseline_subscriptions(&self) {
        for kind in EventKind::ALL {
            let Some(level) = baseline_level(kind) else {
                continue;
            };
            let log_sink = self.log_sink.clone();
            self.events.on(kind, move |envelope| {
                log_sink.log(
                    level,
                    "events",
                    describe(&envelope.event),
                    Some(serde_json::to_value(&envelope.event)?),
                );
                Ok(())
            });
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<D: ActorDirectory + 'static> Guard<D> {
    /// Spawn the escalation drain, the rate-limit sweep and the decision
    /// cache sweep. Must be called from within a tokio runtime.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.lock_tasks();
        if !tasks.is_empty() {
            log::debug!("Background tasks already running");
            return;
        }

        tasks.push(self.audit.spawn_escalation_task());
        tasks.push(self.protection.spawn_cleanup_task());

        let permissions = Arc::clone(&self.permissions);
        let period = self.config.permissions.cache_ttl().max(Duration::from_secs(1));
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                permissions.cleanup_expired_cache();
            }
        }));

        self.log_sink.info(
            COMPONENT,
            format!("Started {} background tasks", tasks.len()),
        );
    }

    /// Wait for Ctrl-C or SIGTERM, then shut down.
    pub async fn run_until_shutdown(&self) {
        shutdown_signal().await;
        self.log_sink
            .info(COMPONENT, "Termination signal received");
        self.shutdown();
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn describe(event: &GuardEvent) -> String {
    match event {
        GuardEvent::SecurityBreachDetected {
            actor_id,
            description,
        } => format!(
            "Security breach detected ({}): {description}",
            actor_id.as_deref().unwrap_or("unknown actor")
        ),
        GuardEvent::RateLimitExceeded {
            actor_id,
            action_class,
            limit,
        } => format!("Rate limit of {limit} exceeded by '{actor_id}' on '{action_class}'"),
        GuardEvent::SuspiciousInput { actor_id, reason } => format!(
            "Suspicious input from {}: {reason}",
            actor_id.as_deref().unwrap_or("unknown actor")
        ),
        GuardEvent::FileRejected { filename, reason } => {
            format!("File '{filename}' rejected: {reason}")
        }
        GuardEvent::PermissionDenied {
            actor_id,
            resource,
            action,
            reason,
        } => format!("Permission denied for '{actor_id}' on {action}:{resource}: {reason}"),
        GuardEvent::ImpersonationStarted {
            actor_id,
            role,
            organization_type,
        } => format!(
            "'{actor_id}' started impersonating '{role}'{}",
            organization_type
                .as_deref()
                .map(|t| format!(" ({t})"))
                .unwrap_or_default()
        ),
        GuardEvent::ImpersonationActive { actor_id, role } => {
            format!("'{actor_id}' acting as '{role}'")
        }
        GuardEvent::ImpersonationEnded { actor_id } => {
            format!("'{actor_id}' stopped impersonating")
        }
        GuardEvent::WorkOrderCreated {
            work_order_id,
            created_by,
        } => format!("Work order {work_order_id} created by '{created_by}'"),
        GuardEvent::WorkOrderUpdated {
            work_order_id,
            updated_by,
            status,
        } => format!(
            "Work order {work_order_id} updated by '{updated_by}'{}",
            status
                .as_deref()
                .map(|s| format!(" (status: {s})"))
                .unwrap_or_default()
        ),
        GuardEvent::WorkOrderAssigned {
            work_order_id,
            assigned_to,
            assigned_by,
        } => format!("Work order {work_order_id} assigned to '{assigned_to}' by '{assigned_by}'"),
        GuardEvent::AuditEscalated {
            entry_id,
            action,
            risk_level,
        } => format!("Audit entry {entry_id} ({action}) escalated as {risk_level}"),
    }
}
