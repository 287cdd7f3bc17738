//! Concrete resource records that conditional permissions are evaluated against.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete record (a particular work order, a particular user profile).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInstance {
    /// Type of resource (e.g. "work_orders", "users").
    pub resource_type: String,
    pub id: String,
    /// Organization the record belongs to.
    pub organization_id: Option<String>,
    /// Actor that created or owns the record.
    pub owner_id: Option<String>,
    /// Actors the record is assigned to.
    #[serde(default)]
    pub assigned_to: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ResourceInstance {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Add an assignee.
    pub fn assigned_to(mut self, actor_id: impl Into<String>) -> Self {
        self.assigned_to.push(actor_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_assigned_to(&self, actor_id: &str) -> bool {
        self.assigned_to.iter().any(|assignee| assignee == actor_id)
    }
}
