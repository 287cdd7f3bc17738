//! # Dispatch Guard
//!
//! The authorization, audit and protective-control core of a field-service
//! dispatch platform.
//!
//! ## Features
//!
//! - Role-based permission engine with wildcard and conditional permissions
//! - A bypass role that is granted everything, even while impersonating
//! - Role impersonation for testing sessions
//! - Short-lived decision cache
//! - Risk-scored, bounded audit trail with critical-event escalation
//! - Per-actor fixed-window rate limiting
//! - Input validation, sanitization and upload screening
//! - Synchronous event bus over typed events
//! - Bounded structured log sink
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_guard::{Actor, Guard, GuardConfig, MemoryActorDirectory, PermissionContext};
//! use dispatch_guard::resource::ResourceInstance;
//!
//! let directory: MemoryActorDirectory = [
//!     Actor::new("dana", ["dispatcher"]).with_organization("acme"),
//!     Actor::new("root", ["super_admin"]),
//! ]
//! .into_iter()
//! .collect();
//!
//! let guard = Guard::bootstrap(GuardConfig::default(), directory, None)?;
//!
//! let order = ResourceInstance::new("work_orders", "wo-17").with_organization("acme");
//! let context = PermissionContext::new().with_resource(order);
//!
//! assert!(guard.permissions().has_permission("dana", "work_orders", "assign", Some(&context)));
//! assert!(!guard.permissions().has_permission("dana", "companies", "delete", None));
//! assert!(guard.permissions().check_permission("root", "companies", "delete", None).bypass_used);
//! # Ok::<(), dispatch_guard::Error>(())
//! ```
//!
//! ## Logging
//!
//! Every component writes to the structured [`LogSink`](log_sink::LogSink),
//! which mirrors entries onto the `log` facade. To see them on stderr:
//!
//! ```rust
//! use dispatch_guard::{init_logger, RuntimeMode};
//!
//! init_logger(RuntimeMode::from_env());
//! // RUST_LOG=dispatch_guard=debug overrides the default level
//! ```

/// Initialise `env_logger` at `info` in production and `debug` otherwise.
/// `RUST_LOG` takes precedence. Calling it more than once is harmless.
pub fn init_logger(mode: RuntimeMode) {
    let default_level = if mode.is_production() { "info" } else { "debug" };
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env).try_init();
}

pub mod actor;
pub mod audit;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod log_sink;
pub mod macros;
pub mod metrics;
pub mod permission;
pub mod protection;
pub mod rate_limit;
pub mod redact;
pub mod resource;
pub mod role;
pub mod transform;
pub mod validation;

#[cfg(test)]
mod property_tests;

// Re-export main types for convenience
pub use crate::{
    actor::{Actor, ActorDirectory, MemoryActorDirectory},
    audit::{AlertSink, AuditEntry, AuditEvent, AuditFilter, AuditTrail, ExportFormat, RiskLevel},
    bootstrap::{Guard, GuardBuilder},
    config::{GuardConfig, RuntimeMode},
    context::PermissionContext,
    engine::PermissionEngine,
    error::{Error, Result},
    events::{EventBus, EventKind, GuardEvent},
    log_sink::{LogLevel, LogSink},
    permission::{Condition, Permission, PermissionDecision},
    protection::ProtectiveControls,
    role::{RoleDefinition, RoleRegistry},
};
