//! Protective controls: rate limiting, input validation, upload screening and
//! the sensitive-data transform behind one service.
//!
//! Validation and rate-limit failures are reported as `false`; the reason is
//! logged, counted and published on the event bus.

use crate::config::GuardConfig;
use crate::error::Result;
use crate::events::{EventBus, GuardEvent};
use crate::log_sink::{LogLevel, LogSink};
use crate::metrics::GuardMetrics;
use crate::rate_limit::{RateLimitOutcome, RateLimitStats, RateLimiter};
use crate::transform::SensitiveDataCodec;
use crate::validation::{InputSchema, InputValidator};
use serde_json::{json, Value};
use std::sync::Arc;

const COMPONENT: &str = "protection";

/// Rate limiting, validation and transform service.
#[derive(Debug)]
pub struct ProtectiveControls {
    limiter: Arc<RateLimiter>,
    validator: InputValidator,
    codec: SensitiveDataCodec,
    log_sink: Arc<LogSink>,
    events: Arc<EventBus>,
    metrics: Arc<GuardMetrics>,
}

impl ProtectiveControls {
    pub fn new(
        config: &GuardConfig,
        log_sink: Arc<LogSink>,
        events: Arc<EventBus>,
        metrics: Arc<GuardMetrics>,
    ) -> Result<Self> {
        Ok(Self {
            limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
            validator: InputValidator::new(config.validation.clone())?,
            codec: SensitiveDataCodec::new(&config.transform_key),
            log_sink,
            events,
            metrics,
        })
    }

    /// Count a request; false when the actor's window for `action_class` is
    /// full.
    pub fn check_rate_limit(&self, actor_id: &str, action_class: &str) -> bool {
        self.rate_limit(actor_id, action_class).allowed
    }

    /// Like [`check_rate_limit`](Self::check_rate_limit), with the window
    /// details.
    pub fn rate_limit(&self, actor_id: &str, action_class: &str) -> RateLimitOutcome {
        let outcome = self.limiter.check(actor_id, action_class);
        if !outcome.allowed {
            self.metrics.record_rate_limited();
            self.log_sink.log(
                LogLevel::Warn,
                COMPONENT,
                format!("Rate limit exceeded for '{actor_id}' on '{action_class}'"),
                Some(json!({
                    "actorId": actor_id,
                    "actionClass": action_class,
                    "limit": outcome.limit,
                    "retryAfterMs": outcome.retry_after.as_millis() as u64,
                })),
            );
            self.events.emit(GuardEvent::RateLimitExceeded {
                actor_id: actor_id.to_string(),
                action_class: action_class.to_string(),
                limit: outcome.limit,
            });
        }
        outcome
    }

    pub fn validate_input(&self, input: &Value, schema: Option<&dyn InputSchema>) -> bool {
        self.validate_input_from(None, input, schema)
    }

    /// Validate input attributed to an actor, so that suspicious input can be
    /// traced back.
    pub fn validate_input_from(
        &self,
        actor_id: Option<&str>,
        input: &Value,
        schema: Option<&dyn InputSchema>,
    ) -> bool {
        let Err(issue) = self.validator.check(input, schema) else {
            return true;
        };

        self.metrics.record_validation_rejection();
        if issue.is_suspicious() {
            self.log_sink.warn(
                COMPONENT,
                format!(
                    "Suspicious input from {}: {issue}",
                    actor_id.unwrap_or("unknown actor")
                ),
            );
            self.events.emit(GuardEvent::SuspiciousInput {
                actor_id: actor_id.map(str::to_string),
                reason: issue.to_string(),
            });
        } else {
            self.log_sink
                .debug(COMPONENT, format!("Input rejected: {issue}"));
        }
        false
    }

    pub fn sanitize_input(&self, input: &Value) -> Value {
        self.validator.sanitize_input(input)
    }

    pub fn validate_file_upload(&self, filename: &str, content: &[u8]) -> bool {
        let Err(rejection) = self.validator.check_file_upload(filename, content) else {
            return true;
        };

        self.metrics.record_upload_rejection();
        self.log_sink.warn(
            COMPONENT,
            format!("Upload '{filename}' rejected: {rejection}"),
        );
        self.events.emit(GuardEvent::FileRejected {
            filename: filename.to_string(),
            reason: rejection.to_string(),
        });
        false
    }

    pub fn encrypt_sensitive_data(&self, plaintext: &str) -> String {
        self.codec.encrypt(plaintext)
    }

    pub fn decrypt_sensitive_data(&self, encoded: &str) -> Result<String> {
        self.codec.decrypt(encoded).inspect_err(|e| {
            self.metrics.record_error("transform");
            self.log_sink.error(COMPONENT, format!("Decrypt failed: {e}"));
        })
    }

    pub fn reset_rate_limits(&self, actor_id: &str) -> usize {
        self.limiter.reset_actor(actor_id)
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Periodic sweep of expired rate-limit windows.
    pub fn spawn_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        self.limiter.spawn_cleanup_task()
    }
}
