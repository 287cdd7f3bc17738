//! Permission engine.
//!
//! Answers "may actor A perform action X on resource R?". The engine:
//!
//! - returns a cached decision when a live one exists for the same key
//! - looks the actor up in the [`ActorDirectory`]; unknown actors are denied
//! - grants everything to holders of the bypass role, even while they
//!   impersonate another role
//! - otherwise resolves the effective role (the impersonated role, else the
//!   highest-level assigned role, else the default minimal role) and scans its
//!   permissions, then those of the roles it inherits from
//!
//! [`PermissionEngine::check_permission`] never fails: lookup errors become a
//! deny decision with a diagnostic reason.

use crate::actor::{Actor, ActorDirectory};
use crate::cache::{CacheStats, DecisionCache, DecisionKey};
use crate::config::PermissionConfig;
use crate::context::PermissionContext;
use crate::error::{Error, Result};
use crate::events::{EventBus, GuardEvent};
use crate::log_sink::LogSink;
use crate::metrics::{CheckTimer, GuardMetrics};
use crate::permission::{Condition, Permission, PermissionDecision};
use crate::role::RoleRegistry;
use std::sync::Arc;

pub const REASON_ACTOR_NOT_FOUND: &str = "actor not found";
pub const REASON_ROLE_NOT_DEFINED: &str = "role not defined";
pub const REASON_DENIED_BY_ROLE: &str = "permission denied by role";

const COMPONENT: &str = "permission";

/// Role-based permission engine over an actor directory.
pub struct PermissionEngine<D: ActorDirectory> {
    directory: D,
    registry: RoleRegistry,
    config: PermissionConfig,
    cache: DecisionCache,
    log_sink: Arc<LogSink>,
    events: Arc<EventBus>,
    metrics: Arc<GuardMetrics>,
}

impl<D: ActorDirectory> std::fmt::Debug for PermissionEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEngine")
            .field("roles", &self.registry.names())
            .field("bypass_role", &self.config.bypass_role)
            .field("default_role", &self.config.default_role)
            .field("cached_decisions", &self.cache.len())
            .finish()
    }
}

impl<D: ActorDirectory> PermissionEngine<D> {
    /// Create an engine. The registry must define the default role.
    pub fn new(
        directory: D,
        registry: RoleRegistry,
        config: PermissionConfig,
        log_sink: Arc<LogSink>,
        events: Arc<EventBus>,
        metrics: Arc<GuardMetrics>,
    ) -> Result<Self> {
        if !registry.contains(&config.default_role) {
            return Err(Error::InvalidConfiguration(format!(
                "default role '{}' is not registered",
                config.default_role
            )));
        }

        let cache = DecisionCache::new(config.cache_ttl());
        log_sink.info(
            COMPONENT,
            format!(
                "Permission engine ready with {} roles (bypass: '{}', default: '{}')",
                registry.len(),
                config.bypass_role,
                config.default_role
            ),
        );

        Ok(Self {
            directory,
            registry,
            config,
            cache,
            log_sink,
            events,
            metrics,
        })
    }

    /// Decide whether `actor_id` may perform `action` on `resource`.
    pub fn check_permission(
        &self,
        actor_id: &str,
        resource: &str,
        action: &str,
        context: Option<&PermissionContext>,
    ) -> PermissionDecision {
        let _timer = CheckTimer::start(&self.metrics);
        let key = DecisionKey::new(actor_id, resource, action, context);

        if self.config.enable_caching {
            if let Some(decision) = self.cache.get(&key) {
                self.metrics.record_cache_hit();
                self.metrics
                    .record_decision(decision.granted, decision.bypass_used);
                self.log_sink
                    .record_permission_check(actor_id, resource, action, &decision);
                return decision;
            }
            self.metrics.record_cache_miss();
        }

        let outcome = match self.directory.get_actor(actor_id) {
            Ok(actor) => self.evaluate(actor, resource, action, context),
            Err(e) => {
                self.metrics.record_error("directory");
                Err(e)
            }
        };

        let decision = match outcome {
            Ok(decision) => {
                if self.config.enable_caching {
                    self.cache.insert(key, decision.clone());
                }
                decision
            }
            Err(e) => {
                self.log_sink.warn(
                    COMPONENT,
                    format!("Permission check for '{actor_id}' failed closed: {e}"),
                );
                let reason = match e {
                    Error::Directory(_) | Error::ActorNotFound(_) => {
                        format!("actor lookup failed: {e}")
                    }
                    other => {
                        self.metrics.record_error("permission_check");
                        format!("permission check failed: {other}")
                    }
                };
                PermissionDecision::deny(reason, None)
            }
        };

        self.metrics
            .record_decision(decision.granted, decision.bypass_used);
        self.log_sink
            .record_permission_check(actor_id, resource, action, &decision);

        if !decision.granted {
            self.events.emit(GuardEvent::PermissionDenied {
                actor_id: actor_id.to_string(),
                resource: resource.to_string(),
                action: action.to_string(),
                reason: decision.reason.clone(),
            });
        }

        decision
    }

    /// Boolean form of [`check_permission`](Self::check_permission).
    pub fn has_permission(
        &self,
        actor_id: &str,
        resource: &str,
        action: &str,
        context: Option<&PermissionContext>,
    ) -> bool {
        self.check_permission(actor_id, resource, action, context)
            .granted
    }

    /// The role a check for this actor would be evaluated under.
    pub fn effective_role(&self, actor: &Actor, context: Option<&PermissionContext>) -> String {
        if let Some(role) = context.and_then(|c| c.impersonated_role.as_deref()) {
            return role.to_string();
        }

        self.registry
            .highest_role(&actor.roles)
            .map(|role| role.name().to_string())
            .unwrap_or_else(|| self.config.default_role.clone())
    }

    /// Start a testing session in which `actor_id` acts as `role`. Returns
    /// the context to pass into subsequent checks.
    pub fn begin_impersonation(
        &self,
        actor_id: &str,
        role: &str,
        org_type: Option<&str>,
    ) -> Result<PermissionContext> {
        if !self.registry.contains(role) {
            return Err(Error::RoleNotFound(role.to_string()));
        }
        if self.directory.get_actor(actor_id)?.is_none() {
            return Err(Error::ActorNotFound(actor_id.to_string()));
        }

        self.cache.invalidate_actor(actor_id);
        self.events.emit(GuardEvent::ImpersonationStarted {
            actor_id: actor_id.to_string(),
            role: role.to_string(),
            organization_type: org_type.map(str::to_string),
        });

        let mut context = PermissionContext::impersonating(role);
        context.impersonated_org_type = org_type.map(str::to_string);
        Ok(context)
    }

    /// End a testing session started with [`begin_impersonation`](Self::begin_impersonation).
    pub fn end_impersonation(&self, actor_id: &str) {
        self.cache.invalidate_actor(actor_id);
        self.events.emit(GuardEvent::ImpersonationEnded {
            actor_id: actor_id.to_string(),
        });
    }

    /// Forget cached decisions for an actor, e.g. after a role change.
    pub fn invalidate_actor(&self, actor_id: &str) -> usize {
        self.cache.invalidate_actor(actor_id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cleanup_expired_cache(&self) -> usize {
        self.cache.cleanup_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    // Internal implementation

    fn evaluate(
        &self,
        actor: Option<Actor>,
        resource: &str,
        action: &str,
        context: Option<&PermissionContext>,
    ) -> Result<PermissionDecision> {
        let Some(actor) = actor else {
            return Ok(PermissionDecision::deny(REASON_ACTOR_NOT_FOUND, None));
        };

        if actor.has_role(&self.config.bypass_role) {
            return Ok(PermissionDecision::bypass(&self.config.bypass_role));
        }

        let role_name = self.effective_role(&actor, context);

        if let Some(context) = context.filter(|c| c.is_impersonating()) {
            self.log_sink.info(
                COMPONENT,
                format!(
                    "Actor '{}' checked {}:{} as impersonated role '{}' (org type: {})",
                    actor.id,
                    action,
                    resource,
                    role_name,
                    context.impersonated_org_type.as_deref().unwrap_or("unchanged")
                ),
            );
            self.events.emit(GuardEvent::ImpersonationActive {
                actor_id: actor.id.clone(),
                role: role_name.clone(),
            });
        }

        if !self.registry.contains(&role_name) {
            return Ok(PermissionDecision::deny(
                REASON_ROLE_NOT_DEFINED,
                Some(role_name),
            ));
        }

        let chain = self
            .registry
            .permission_chain(&role_name, self.config.max_inheritance_depth)?;
        let resource_instance = context.and_then(|c| c.resource.as_ref());

        for permission in chain {
            if permission.is_global_wildcard() {
                return Ok(PermissionDecision::grant(
                    format!("granted by {permission}"),
                    role_name,
                ));
            }

            if !permission.matches(action, resource) {
                continue;
            }

            if self.conditions_hold(permission, &actor, resource_instance) {
                return Ok(PermissionDecision::grant(
                    format!("granted by {permission}"),
                    role_name,
                ));
            }
        }

        Ok(PermissionDecision::deny(REASON_DENIED_BY_ROLE, Some(role_name)))
    }

    fn conditions_hold(
        &self,
        permission: &Permission,
        actor: &Actor,
        resource: Option<&crate::resource::ResourceInstance>,
    ) -> bool {
        permission.conditions().iter().all(|condition| {
            if let Condition::Unknown(tag) = condition {
                self.log_sink.warn(
                    COMPONENT,
                    format!("Unknown permission condition '{tag}' on {permission}; denying"),
                );
                return false;
            }
            condition.evaluate(actor, resource)
        })
    }
}
