//! Permission definitions, conditions and decisions.

use crate::actor::Actor;
use crate::error::{Error, Result};
use crate::resource::ResourceInstance;
use serde::{Deserialize, Serialize};

/// Matches any resource or any action.
pub const WILDCARD: &str = "*";

/// A predicate a conditional permission must satisfy, evaluated against the
/// acting [`Actor`] and the concrete [`ResourceInstance`] being touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Condition {
    /// The resource belongs to the actor's own organization.
    OwnOrganization,
    /// The actor is one of the resource's assignees.
    AssignedToActor,
    /// The actor owns (created) the resource.
    OwnedByActor,
    /// A tag this build does not understand. Always evaluates false.
    Unknown(String),
}

impl Condition {
    /// The tag used in role tables.
    pub fn tag(&self) -> &str {
        match self {
            Condition::OwnOrganization => "own_organization",
            Condition::AssignedToActor => "assigned_to_actor",
            Condition::OwnedByActor => "owned_by_actor",
            Condition::Unknown(tag) => tag,
        }
    }

    /// Evaluate against an actor and resource. A missing resource instance
    /// fails every condition.
    pub fn evaluate(&self, actor: &Actor, resource: Option<&ResourceInstance>) -> bool {
        let Some(resource) = resource else {
            return false;
        };

        match self {
            Condition::OwnOrganization => match (&actor.organization_id, &resource.organization_id)
            {
                (Some(actor_org), Some(resource_org)) => actor_org == resource_org,
                _ => false,
            },
            Condition::AssignedToActor => resource.is_assigned_to(&actor.id),
            Condition::OwnedByActor => resource.owner_id.as_deref() == Some(actor.id.as_str()),
            Condition::Unknown(_) => false,
        }
    }
}

impl From<&str> for Condition {
    fn from(tag: &str) -> Self {
        match tag.trim() {
            "own_organization" => Condition::OwnOrganization,
            "assigned_to_actor" => Condition::AssignedToActor,
            "owned_by_actor" => Condition::OwnedByActor,
            other => Condition::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Condition {
    fn from(tag: String) -> Self {
        Condition::from(tag.as_str())
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.tag().to_string()
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A permission grants an action on a resource type, optionally only when
/// all of its conditions hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// The resource type (e.g. "work_orders") or `*`.
    resource: String,
    /// The action (e.g. "read", "assign") or `*`.
    action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<Condition>,
}

impl Permission {
    /// Create a permission for an action on a resource type.
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            conditions: Vec::new(),
        }
    }

    /// Create a permission that only applies when `condition` holds.
    pub fn with_condition(
        action: impl Into<String>,
        resource: impl Into<String>,
        condition: impl Into<Condition>,
    ) -> Self {
        Self::new(action, resource).and_condition(condition)
    }

    /// Add another condition; all conditions must hold.
    pub fn and_condition(mut self, condition: impl Into<Condition>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// Every action on a resource type.
    pub fn wildcard(resource: impl Into<String>) -> Self {
        Self::new(WILDCARD, resource)
    }

    /// Every action on every resource.
    pub fn all() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// True for an unconditional `*:*`.
    pub fn is_global_wildcard(&self) -> bool {
        self.action == WILDCARD && self.resource == WILDCARD && self.conditions.is_empty()
    }

    /// Check if this permission matches the given action and resource type.
    pub fn matches(&self, action: &str, resource: &str) -> bool {
        let action_match = self.action == WILDCARD || self.action == action;
        let resource_match = self.resource == WILDCARD || self.resource == resource;
        action_match && resource_match
    }

    /// Parse `action:resource` with optional `?cond,cond` suffix,
    /// e.g. `read:work_orders?assigned_to_actor`.
    pub fn parse(permission_str: &str) -> Result<Self> {
        let (body, conditions) = match permission_str.split_once('?') {
            Some((body, conditions)) => (body, Some(conditions)),
            None => (permission_str, None),
        };

        let parts: Vec<&str> = body.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::InvalidPermission(format!(
                "Permission must be in format 'action:resource', got: '{permission_str}'"
            )));
        }

        let action = parts[0].trim();
        let resource = parts[1].trim();

        if action.is_empty() || resource.is_empty() {
            return Err(Error::InvalidPermission(format!(
                "Action and resource cannot be empty: '{permission_str}'"
            )));
        }

        if action.contains('\0') || resource.contains('\0') {
            return Err(Error::InvalidPermission(format!(
                "Action and resource cannot contain null characters: '{permission_str}'"
            )));
        }

        let mut permission = Self::new(action, resource);
        if let Some(conditions) = conditions {
            for tag in conditions.split(',').filter(|tag| !tag.trim().is_empty()) {
                permission = permission.and_condition(tag);
            }
        }
        Ok(permission)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.action, self.resource)?;
        if !self.conditions.is_empty() {
            let tags: Vec<&str> = self.conditions.iter().map(Condition::tag).collect();
            write!(f, "?{}", tags.join(","))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub granted: bool,
    pub reason: String,
    pub bypass_used: bool,
    /// The role the decision was made under, if one was resolved.
    pub applied_role: Option<String>,
}

impl PermissionDecision {
    pub fn grant(reason: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            granted: true,
            reason: reason.into(),
            bypass_used: false,
            applied_role: Some(role.into()),
        }
    }

    pub fn deny(reason: impl Into<String>, role: Option<String>) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
            bypass_used: false,
            applied_role: role,
        }
    }

    /// Granted through the bypass role.
    pub fn bypass(role: impl Into<String>) -> Self {
        Self {
            granted: true,
            reason: "bypass role".to_string(),
            bypass_used: true,
            applied_role: Some(role.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Actor {
        Actor::new("agent-1", ["field_agent"]).with_organization("org-a")
    }

    #[test]
    fn test_permission_matching() {
        let permission = Permission::new("read", "work_orders");
        assert!(permission.matches("read", "work_orders"));
        assert!(!permission.matches("update", "work_orders"));
        assert!(!permission.matches("read", "users"));
    }

    #[test]
    fn test_wildcards() {
        assert!(Permission::wildcard("work_orders").matches("assign", "work_orders"));
        assert!(!Permission::wildcard("work_orders").matches("assign", "users"));
        assert!(Permission::new("read", WILDCARD).matches("read", "anything"));
        assert!(Permission::all().is_global_wildcard());
        assert!(!Permission::all()
            .and_condition(Condition::OwnOrganization)
            .is_global_wildcard());
    }

    #[test]
    fn test_permission_parsing() {
        let permission = Permission::parse("read:work_orders").unwrap();
        assert_eq!(permission.action(), "read");
        assert_eq!(permission.resource(), "work_orders");
        assert!(permission.conditions().is_empty());

        let conditional =
            Permission::parse("update:work_orders?assigned_to_actor,own_organization").unwrap();
        assert_eq!(
            conditional.conditions(),
            &[Condition::AssignedToActor, Condition::OwnOrganization]
        );
        assert_eq!(
            conditional.to_string(),
            "update:work_orders?assigned_to_actor,own_organization"
        );

        assert!(Permission::parse("invalid").is_err());
        assert!(Permission::parse("read:").is_err());
        assert!(Permission::parse(":work_orders").is_err());
    }

    #[test]
    fn test_unknown_condition_tag_is_preserved() {
        let permission = Permission::parse("read:invoices?during_business_hours").unwrap();
        assert_eq!(
            permission.conditions(),
            &[Condition::Unknown("during_business_hours".to_string())]
        );
    }

    #[test]
    fn test_conditions_against_resource() {
        let actor = agent();
        let resource = ResourceInstance::new("work_orders", "wo-1")
            .with_organization("org-a")
            .with_owner("customer-9")
            .assigned_to("agent-1");

        assert!(Condition::OwnOrganization.evaluate(&actor, Some(&resource)));
        assert!(Condition::AssignedToActor.evaluate(&actor, Some(&resource)));
        assert!(!Condition::OwnedByActor.evaluate(&actor, Some(&resource)));
        assert!(!Condition::Unknown("x".into()).evaluate(&actor, Some(&resource)));
    }

    #[test]
    fn test_conditions_fail_without_resource() {
        let actor = agent();
        assert!(!Condition::OwnOrganization.evaluate(&actor, None));
        assert!(!Condition::AssignedToActor.evaluate(&actor, None));
    }

    #[test]
    fn test_org_condition_requires_both_sides() {
        let actor = Actor::new("u1", ["dispatcher"]);
        let resource = ResourceInstance::new("work_orders", "wo-1");
        assert!(!Condition::OwnOrganization.evaluate(&actor, Some(&resource)));
    }

    #[test]
    fn test_decision_serializes_camel_case() {
        let json = serde_json::to_value(PermissionDecision::bypass("super_admin")).unwrap();
        assert_eq!(json["bypassUsed"], true);
        assert_eq!(json["appliedRole"], "super_admin");
    }

    #[test]
    fn test_permission_serde_uses_condition_tags() {
        let permission = Permission::with_condition("read", "work_orders", "owned_by_actor");
        let json = serde_json::to_value(&permission).unwrap();
        assert_eq!(json["conditions"][0], "owned_by_actor");
        let back: Permission = serde_json::from_value(json).unwrap();
        assert_eq!(back, permission);
    }
}
