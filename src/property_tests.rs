//! Property-based tests for the guard core.
//!
//! These use `proptest` to check invariants that must hold for any actor,
//! resource, action or payload, not just the hand-picked ones in the unit
//! tests.

#[cfg(test)]
mod tests {
    use crate::{
        actor::{Actor, MemoryActorDirectory},
        audit::{AlertSink, AuditEntry, AuditEvent, AuditTrail},
        config::{AuditConfig, GuardConfig, LogSinkConfig, RateLimitConfig, RateLimitRule},
        context::PermissionContext,
        engine::PermissionEngine,
        events::EventBus,
        log_sink::LogSink,
        metrics::GuardMetrics,
        permission::Permission,
        rate_limit::RateLimiter,
        role::RoleRegistry,
        transform::SensitiveDataCodec,
        validation::{InputValidator, ValidationIssue},
    };
    use proptest::prelude::*;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct NullAlertSink;

    impl AlertSink for NullAlertSink {
        fn alert(&self, _entry: &AuditEntry) {}
    }

    const DEFAULT_ROLES: [(&str, u32); 7] = [
        ("guest", 0),
        ("customer", 20),
        ("field_agent", 40),
        ("dispatcher", 60),
        ("company_admin", 80),
        ("admin", 90),
        ("super_admin", 100),
    ];

    /// Generate valid identifier strings.
    fn identifier_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-z][a-z0-9_]{0,31}").unwrap()
    }

    /// Generate action strings including wildcards.
    fn action_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("read".to_string()),
            Just("create".to_string()),
            Just("update".to_string()),
            Just("delete".to_string()),
            Just("assign".to_string()),
            Just("*".to_string()),
            identifier_strategy(),
        ]
    }

    /// Generate resource strings including wildcards.
    fn resource_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("work_orders".to_string()),
            Just("users".to_string()),
            Just("companies".to_string()),
            Just("audit_logs".to_string()),
            Just("*".to_string()),
            identifier_strategy(),
        ]
    }

    /// Generate strings built from fragments of script protocols.
    fn script_fragment_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(vec![
                "java",
                "javascript:",
                "script:",
                "vb",
                "vbscript:",
                "da",
                "data:text/html",
                "ta:text/html",
                " ",
            ])
            .prop_map(|fragment| fragment.to_string()),
            ".{0,5}",
        ]
    }

    fn services() -> (Arc<LogSink>, Arc<EventBus>, Arc<GuardMetrics>) {
        let sink = Arc::new(LogSink::new(
            &LogSinkConfig { capacity: 64 },
            crate::config::RuntimeMode::Production,
        ));
        let events = Arc::new(EventBus::new(sink.clone()));
        (sink, events, Arc::new(GuardMetrics::new()))
    }

    fn engine(actors: Vec<Actor>) -> PermissionEngine<MemoryActorDirectory> {
        let config = GuardConfig::default().permissions;
        let registry =
            RoleRegistry::with_defaults(&config.bypass_role, &config.default_role).unwrap();
        let (sink, events, metrics) = services();
        PermissionEngine::new(
            actors.into_iter().collect(),
            registry,
            config,
            sink,
            events,
            metrics,
        )
        .unwrap()
    }

    proptest! {
        #[test]
        fn prop_bypass_role_is_always_granted(
            action in action_strategy(),
            resource in resource_strategy(),
            impersonated in prop::option::of(identifier_strategy()),
        ) {
            let engine = engine(vec![Actor::new("root", ["super_admin", "guest"])]);
            let context = impersonated.map(PermissionContext::impersonating);

            let decision = engine.check_permission("root", &resource, &action, context.as_ref());
            prop_assert!(decision.granted);
            prop_assert!(decision.bypass_used);
        }

        #[test]
        fn prop_highest_level_role_is_applied(
            picks in prop::collection::vec(0usize..6, 1..6),
        ) {
            // super_admin (index 6) is excluded: it short-circuits role resolution
            let roles: Vec<&str> = picks.iter().map(|&i| DEFAULT_ROLES[i].0).collect();
            let expected = picks.iter().map(|&i| DEFAULT_ROLES[i]).max_by_key(|(_, level)| *level).unwrap().0;

            let engine = engine(vec![Actor::new("a1", roles)]);
            let decision = engine.check_permission("a1", "public", "read", None);
            prop_assert_eq!(decision.applied_role.as_deref(), Some(expected));
        }

        #[test]
        fn prop_cached_decision_is_identical(
            action in action_strategy(),
            resource in resource_strategy(),
        ) {
            let engine = engine(vec![Actor::new("a1", ["dispatcher"])]);
            let first = engine.check_permission("a1", &resource, &action, None);
            let second = engine.check_permission("a1", &resource, &action, None);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_wildcard_permission_matches_any_action(
            action in identifier_strategy(),
            resource in identifier_strategy(),
        ) {
            prop_assert!(Permission::wildcard(resource.clone()).matches(&action, &resource));
            prop_assert!(Permission::all().matches(&action, &resource));
        }

        #[test]
        fn prop_ring_buffer_respects_capacity(
            capacity in 1usize..20,
            count in 0usize..60,
        ) {
            let (sink, events, metrics) = services();
            let trail = AuditTrail::new(
                AuditConfig { capacity, ..AuditConfig::default() },
                Arc::new(NullAlertSink),
                sink,
                events,
                metrics,
            );
            for i in 0..count {
                trail.log_event(AuditEvent::new("workOrder", i.to_string(), "updated", "a1")).unwrap();
            }

            prop_assert_eq!(trail.len(), count.min(capacity));
            if count > 0 {
                let newest = trail.query(&Default::default());
                prop_assert_eq!(newest[0].entity_id.clone(), (count - 1).to_string());
            }
        }

        #[test]
        fn prop_rate_limiter_never_exceeds_budget(
            max_requests in 1u64..20,
            attempts in 0u64..50,
        ) {
            let limiter = RateLimiter::new(
                RateLimitConfig::default()
                    .with_class("test", RateLimitRule::new(Duration::from_secs(60), max_requests)),
            );
            let now = Instant::now();
            let allowed = (0..attempts)
                .filter(|_| limiter.check_at("a1", "test", now).allowed)
                .count() as u64;
            prop_assert_eq!(allowed, attempts.min(max_requests));
        }

        #[test]
        fn prop_transform_round_trips(
            key in ".{0,32}",
            plaintext in ".{0,256}",
        ) {
            let codec = SensitiveDataCodec::new(&key);
            let encoded = codec.encrypt(&plaintext);
            prop_assert!(SensitiveDataCodec::is_encoded(&encoded));
            prop_assert_eq!(codec.decrypt(&encoded).unwrap(), plaintext);
        }

        #[test]
        fn prop_sanitized_strings_have_no_angle_brackets(input in ".{0,200}") {
            let validator = InputValidator::new(Default::default()).unwrap();
            let Value::String(cleaned) = validator.sanitize_input(&Value::String(input)) else {
                panic!("sanitizing a string must yield a string");
            };
            prop_assert!(!cleaned.contains('<'));
            prop_assert!(!cleaned.contains('>'));
        }

        #[test]
        fn prop_sanitized_output_has_no_script_protocol(
            parts in prop::collection::vec(script_fragment_strategy(), 0..12)
        ) {
            let validator = InputValidator::new(Default::default()).unwrap();
            let cleaned = validator.sanitize_input(&Value::String(parts.concat()));
            prop_assert_ne!(
                validator.inspect(&cleaned),
                Some(ValidationIssue::SuspiciousPattern { pattern: "script protocol" })
            );
        }
    }
}
