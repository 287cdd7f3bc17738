//! Integration tests for the wired guard core.

use dispatch_guard::{
    audit::{AuditEvent, AuditFilter, RiskLevel},
    config::{GuardConfig, RateLimitRule},
    events::{EventKind, GuardEvent},
    log_sink::{LogFilter, LogLevel},
    resource::ResourceInstance,
    Actor, Guard, MemoryActorDirectory, PermissionContext,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn directory() -> MemoryActorDirectory {
    [
        Actor::new("root", ["super_admin"]),
        Actor::new("dana", ["dispatcher"]).with_organization("acme"),
        Actor::new("lee", ["company_admin"]).with_organization("acme"),
        Actor::new("sam", ["field_agent"]).with_organization("acme"),
        Actor::new("cy", ["customer"]),
        Actor::new("stranger", ["unknown_role"]),
    ]
    .into_iter()
    .collect()
}

fn guard() -> Guard<MemoryActorDirectory> {
    Guard::bootstrap(GuardConfig::default(), directory(), None).unwrap()
}

#[test]
fn test_dispatcher_manages_own_organization_work_orders() {
    let guard = guard();
    let engine = guard.permissions();

    let ours = PermissionContext::new()
        .with_resource(ResourceInstance::new("work_orders", "wo-1").with_organization("acme"));
    let theirs = PermissionContext::new()
        .with_resource(ResourceInstance::new("work_orders", "wo-2").with_organization("globex"));

    assert!(engine.has_permission("dana", "work_orders", "assign", Some(&ours)));
    assert!(engine.has_permission("dana", "work_orders", "delete", Some(&ours)));
    assert!(!engine.has_permission("dana", "work_orders", "assign", Some(&theirs)));
    // unconditional create needs no record
    assert!(engine.has_permission("dana", "work_orders", "create", None));
}

#[test]
fn test_company_admin_inherits_dispatcher() {
    let guard = guard();
    let engine = guard.permissions();

    let decision = engine.check_permission("lee", "field_agents", "read", None);
    assert!(decision.granted);
    assert_eq!(decision.applied_role.as_deref(), Some("company_admin"));
    assert!(engine.has_permission("lee", "audit_logs", "read", None));
    assert!(!engine.has_permission("lee", "audit_logs", "delete", None));
}

#[test]
fn test_customer_reads_only_owned_orders() {
    let guard = guard();
    let engine = guard.permissions();

    let own = PermissionContext::new()
        .with_resource(ResourceInstance::new("work_orders", "wo-9").with_owner("cy"));
    let other = PermissionContext::new()
        .with_resource(ResourceInstance::new("work_orders", "wo-8").with_owner("someone"));

    assert!(engine.has_permission("cy", "work_orders", "read", Some(&own)));
    assert!(!engine.has_permission("cy", "work_orders", "read", Some(&other)));
    assert!(!engine.has_permission("cy", "work_orders", "delete", Some(&own)));
}

#[test]
fn test_unknown_roles_get_guest_access() {
    let guard = guard();
    let engine = guard.permissions();

    let decision = engine.check_permission("stranger", "public", "read", None);
    assert!(decision.granted);
    assert_eq!(decision.applied_role.as_deref(), Some("guest"));
    assert!(!engine.has_permission("stranger", "work_orders", "create", None));
}

#[test]
fn test_impersonation_session() {
    let guard = guard();
    let engine = guard.permissions();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::ImpersonationStarted,
        EventKind::ImpersonationActive,
        EventKind::ImpersonationEnded,
    ] {
        let seen = seen.clone();
        guard.events().on(kind, move |envelope| {
            seen.lock().unwrap().push(envelope.event_name);
            Ok(())
        });
    }

    let context = engine
        .begin_impersonation("lee", "field_agent", Some("contractor"))
        .unwrap();
    assert!(!engine.has_permission("lee", "audit_logs", "read", Some(&context)));
    assert!(engine.has_permission("lee", "attachments", "upload", Some(&context)));
    engine.end_impersonation("lee");
    assert!(engine.has_permission("lee", "audit_logs", "read", None));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first().copied(), Some("role.impersonation_started"));
    assert_eq!(seen.last().copied(), Some("role.impersonation_ended"));
    assert!(seen.contains(&"role.impersonation_active"));
}

#[test]
fn test_request_markers_drive_impersonation() {
    let guard = guard();
    let mut markers = std::collections::HashMap::new();
    markers.insert("testing_role".to_string(), "customer".to_string());

    let context = PermissionContext::from_request_markers(&markers);
    assert!(!guard
        .permissions()
        .has_permission("dana", "field_agents", "read", Some(&context)));

    // the bypass role ignores impersonation entirely
    let decision = guard
        .permissions()
        .check_permission("root", "field_agents", "read", Some(&context));
    assert!(decision.bypass_used);
}

#[test]
fn test_denials_reach_log_sink_and_metrics() {
    let guard = guard();
    guard
        .permissions()
        .check_permission("sam", "companies", "delete", None);
    guard
        .permissions()
        .check_permission("sam", "companies", "delete", None);

    let snapshot = guard.metrics().snapshot();
    assert_eq!(snapshot.permission_checks, 2);
    assert_eq!(snapshot.permissions_denied, 2);
    assert_eq!(snapshot.cache_hits, 1);

    let denials = guard.log_sink().query(&LogFilter {
        component: Some("permission".to_string()),
        min_level: Some(LogLevel::Info),
        ..LogFilter::default()
    });
    assert!(denials.iter().any(|entry| entry.message.starts_with("DENIED sam")));
}

#[test]
fn test_audit_trail_through_guard() {
    let guard = guard();
    let audit = guard.audit();

    audit
        .log_event(
            AuditEvent::new("workOrder", "wo-1", "assigned", "dana")
                .with_new_state(json!({ "assignee": "sam" })),
        )
        .unwrap();
    let entry = audit
        .log_event(
            AuditEvent::new("user", "u-5", "role_changed", "root")
                .with_metadata(json!({ "role": "super_admin" })),
        )
        .unwrap();

    // user +20, role_changed +30, bypass performer +15
    assert_eq!(entry.risk_level, RiskLevel::High);
    assert_eq!(audit.pending_escalations(), 1);

    let history = audit.query(&AuditFilter {
        performed_by: Some("dana".to_string()),
        ..AuditFilter::default()
    });
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].risk_level, RiskLevel::Low);
}

#[test]
fn test_work_order_events_are_logged() {
    let guard = guard();
    let delivered = guard.events().emit(GuardEvent::WorkOrderAssigned {
        work_order_id: "wo-3".to_string(),
        assigned_to: "sam".to_string(),
        assigned_by: "dana".to_string(),
    });
    assert_eq!(delivered, 1);

    let logged = guard.log_sink().query(&LogFilter {
        component: Some("events".to_string()),
        ..LogFilter::default()
    });
    assert!(logged[0].message.contains("wo-3"));
}

#[test]
fn test_custom_rate_limit_class() {
    let mut config = GuardConfig::default();
    config.rate_limits = config
        .rate_limits
        .with_class("export", RateLimitRule::new(Duration::from_secs(3600), 2));
    let guard = Guard::bootstrap(config, directory(), None).unwrap();
    let protection = guard.protection();

    assert!(protection.check_rate_limit("dana", "export"));
    assert!(protection.check_rate_limit("dana", "export"));
    assert!(!protection.check_rate_limit("dana", "export"));
    assert!(protection.check_rate_limit("lee", "export"));

    assert_eq!(protection.reset_rate_limits("dana"), 1);
    assert!(protection.check_rate_limit("dana", "export"));
}

#[tokio::test]
async fn test_background_tasks_and_shutdown() {
    let guard = guard();
    guard.start_background_tasks();
    guard
        .audit()
        .log_event(AuditEvent::new("security", "s-1", "security_breach", "ids"))
        .unwrap();

    guard.shutdown();
    assert_eq!(guard.audit().pending_escalations(), 0);
    assert_eq!(guard.background_task_count(), 0);

    let shutdown_logs = guard.log_sink().query(&LogFilter {
        component: Some("bootstrap".to_string()),
        limit: Some(1),
        ..LogFilter::default()
    });
    assert!(shutdown_logs[0].message.starts_with("Shutdown complete"));
}
