//! Role definitions and the registry they live in.
//!
//! Roles are registered once at startup and never mutated afterwards. The
//! registry remembers registration order, which breaks ties between roles of
//! equal level when resolving an actor's effective role.

use crate::error::{Error, Result};
use crate::permission::Permission;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A named bundle of permissions with a privilege level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    name: String,
    /// Higher levels win when an actor holds several roles.
    level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    /// Evaluated in order.
    permissions: Vec<Permission>,
    /// Roles whose permissions are consulted after this role's own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inherits: Vec<String>,
}

impl RoleDefinition {
    pub fn new(name: impl Into<String>, level: u32) -> Self {
        Self {
            name: name.into(),
            level,
            description: None,
            permissions: Vec::new(),
            inherits: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a permission.
    pub fn add_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Append several permissions, keeping their order.
    pub fn add_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    /// Inherit the permissions of another (already registered) role.
    pub fn inherits_from(mut self, parent: impl Into<String>) -> Self {
        self.inherits.push(parent.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn inherits(&self) -> &[String] {
        &self.inherits
    }
}

/// Registration-ordered, name-indexed set of role definitions.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: Vec<RoleDefinition>,
    index: HashMap<String, usize>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role. Parents named in `inherits` must already be
    /// registered, which rules out inheritance cycles.
    pub fn register(&mut self, role: RoleDefinition) -> Result<()> {
        let name = role.name().to_string();

        if self.index.contains_key(&name) {
            return Err(Error::RoleAlreadyExists(name));
        }

        for parent in role.inherits() {
            if parent == &name {
                return Err(Error::CircularInheritance(name));
            }
            if !self.index.contains_key(parent) {
                return Err(Error::RoleNotFound(parent.clone()));
            }
        }

        self.index.insert(name.clone(), self.roles.len());
        self.roles.push(role);

        log::debug!("Role '{name}' registered");
        Ok(())
    }

    /// Register several roles in order.
    pub fn register_all(&mut self, roles: impl IntoIterator<Item = RoleDefinition>) -> Result<()> {
        for role in roles {
            self.register(role)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RoleDefinition> {
        self.index.get(name).map(|&i| &self.roles[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Role names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.roles.iter().map(RoleDefinition::name).collect()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Among `role_names`, the registered role with the highest level.
    /// Ties go to the role registered first; unregistered names are ignored.
    pub fn highest_role<S: AsRef<str>>(&self, role_names: &[S]) -> Option<&RoleDefinition> {
        let mut best: Option<(usize, &RoleDefinition)> = None;

        for name in role_names {
            let Some(&position) = self.index.get(name.as_ref()) else {
                continue;
            };
            let role = &self.roles[position];
            best = match best {
                Some((best_position, best_role))
                    if best_role.level() > role.level()
                        || (best_role.level() == role.level() && best_position < position) =>
                {
                    Some((best_position, best_role))
                }
                _ => Some((position, role)),
            };
        }

        best.map(|(_, role)| role)
    }

    /// The role's own permissions followed by those of its ancestors,
    /// depth-first in declaration order. Each role is visited once.
    pub fn permission_chain(&self, name: &str, max_depth: usize) -> Result<Vec<&Permission>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        self.collect_permissions(name, &mut chain, &mut visited, 0, max_depth)?;
        Ok(chain)
    }

    fn collect_permissions<'a>(
        &'a self,
        name: &str,
        chain: &mut Vec<&'a Permission>,
        visited: &mut HashSet<String>,
        depth: usize,
        max_depth: usize,
    ) -> Result<()> {
        if depth > max_depth {
            return Err(Error::MaxDepthExceeded(max_depth));
        }

        if !visited.insert(name.to_string()) {
            return Ok(());
        }

        let role = self
            .get(name)
            .ok_or_else(|| Error::RoleNotFound(name.to_string()))?;

        chain.extend(role.permissions());

        for parent in role.inherits() {
            self.collect_permissions(parent, chain, visited, depth + 1, max_depth)?;
        }

        Ok(())
    }

    /// The stock role table for a dispatch platform.
    pub fn with_defaults(bypass_role: &str, default_role: &str) -> Result<Self> {
        let mut registry = Self::new();

        registry.register_all([
            RoleDefinition::new(default_role, 0)
                .with_description("Minimal access for unrecognized actors")
                .add_permission(Permission::new("read", "public")),
            RoleDefinition::new("customer", 20)
                .with_description("Requests and follows its own work orders")
                .add_permission(Permission::new("create", "work_orders"))
                .add_permission(Permission::with_condition(
                    "read",
                    "work_orders",
                    "owned_by_actor",
                ))
                .add_permission(Permission::with_condition(
                    "update",
                    "profile",
                    "owned_by_actor",
                ))
                .inherits_from(default_role),
            RoleDefinition::new("field_agent", 40)
                .with_description("Performs assigned jobs on site")
                .add_permission(Permission::with_condition(
                    "read",
                    "work_orders",
                    "assigned_to_actor",
                ))
                .add_permission(Permission::with_condition(
                    "update",
                    "work_orders",
                    "assigned_to_actor",
                ))
                .add_permission(Permission::new("upload", "attachments"))
                .add_permission(Permission::with_condition(
                    "update",
                    "profile",
                    "owned_by_actor",
                ))
                .inherits_from(default_role),
            RoleDefinition::new("dispatcher", 60)
                .with_description("Creates, schedules and assigns work orders")
                .add_permission(Permission::with_condition(
                    "*",
                    "work_orders",
                    "own_organization",
                ))
                .add_permission(Permission::new("create", "work_orders"))
                .add_permission(Permission::new("read", "field_agents"))
                .add_permission(Permission::new("upload", "attachments"))
                .inherits_from(default_role),
            RoleDefinition::new("company_admin", 80)
                .with_description("Administers one organization")
                .add_permission(Permission::with_condition("*", "users", "own_organization"))
                .add_permission(Permission::with_condition(
                    "*",
                    "companies",
                    "own_organization",
                ))
                .add_permission(Permission::new("read", "audit_logs"))
                .inherits_from("dispatcher"),
            RoleDefinition::new("admin", 90)
                .with_description("Platform operations")
                .add_permission(Permission::wildcard("work_orders"))
                .add_permission(Permission::wildcard("users"))
                .add_permission(Permission::wildcard("companies"))
                .add_permission(Permission::wildcard("audit_logs"))
                .inherits_from(default_role),
            RoleDefinition::new(bypass_role, 100)
                .with_description("Unrestricted access")
                .add_permission(Permission::all()),
        ])?;

        Ok(registry)
    }
}
