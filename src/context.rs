//! Per-request context passed into permission checks.
//!
//! Carries the impersonation (testing) markers a caller extracted from the
//! request and, for conditional permissions, the record being acted on.

use crate::resource::ResourceInstance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request marker naming the role being impersonated.
pub const TESTING_ROLE_MARKER: &str = "testing_role";
/// Request marker naming the organization type being impersonated.
pub const TESTING_ORG_TYPE_MARKER: &str = "testing_org_type";

/// Optional context for [`crate::engine::PermissionEngine::check_permission`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionContext {
    pub impersonated_role: Option<String>,
    pub impersonated_org_type: Option<String>,
    pub resource: Option<ResourceInstance>,
}

impl PermissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the impersonation markers from a request's marker bag.
    /// Blank values are ignored.
    pub fn from_request_markers(markers: &HashMap<String, String>) -> Self {
        let marker = |key: &str| {
            markers
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            impersonated_role: marker(TESTING_ROLE_MARKER),
            impersonated_org_type: marker(TESTING_ORG_TYPE_MARKER),
            resource: None,
        }
    }

    /// Context that impersonates `role`.
    pub fn impersonating(role: impl Into<String>) -> Self {
        Self {
            impersonated_role: Some(role.into()),
            ..Self::default()
        }
    }

    pub fn with_org_type(mut self, org_type: impl Into<String>) -> Self {
        self.impersonated_org_type = Some(org_type.into());
        self
    }

    /// Attach the record being acted on.
    pub fn with_resource(mut self, resource: ResourceInstance) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn is_impersonating(&self) -> bool {
        self.impersonated_role.is_some()
    }

    /// Part of the decision-cache key contributed by this context. Empty when
    /// the context carries nothing that can change a decision.
    pub fn cache_scope(&self) -> String {
        let mut parts = Vec::new();
        if let Some(role) = &self.impersonated_role {
            parts.push(format!("role={role}"));
        }
        if let Some(org_type) = &self.impersonated_org_type {
            parts.push(format!("org_type={org_type}"));
        }
        if let Some(resource) = &self.resource {
            parts.push(format!("record={}/{}", resource.resource_type, resource.id));
        }
        parts.join(";")
    }
}
