//! Convenience macros for seeding role tables.

/// Build a `Vec<Permission>` from `action => resource` pairs. A pair may carry
/// conditions in an `if [...]` list.
///
/// # Examples
///
/// ```rust
/// use dispatch_guard::permissions;
///
/// let perms = permissions![
///     "read" => "work_orders" if ["assigned_to_actor"],
///     "upload" => "attachments",
/// ];
/// assert_eq!(perms.len(), 2);
/// assert_eq!(perms[0].to_string(), "read:work_orders?assigned_to_actor");
/// ```
#[macro_export]
macro_rules! permissions {
    ($($action:literal => $resource:literal $(if [$($condition:literal),+ $(,)?])?),* $(,)?) => {
        vec![$(
            $crate::permission::Permission::new($action, $resource)
                $($(.and_condition($condition))+)?
        ),*]
    };
}

/// Build a [`RoleDefinition`](crate::role::RoleDefinition) in one expression.
///
/// # Examples
///
/// ```rust
/// use dispatch_guard::role_definition;
///
/// let role = role_definition! {
///     name: "auditor",
///     level: 50,
///     description: "Reads the audit trail",
///     inherits: ["guest"],
///     permissions: [
///         "read" => "audit_logs",
///         "export" => "audit_logs",
///     ]
/// };
/// assert_eq!(role.level(), 50);
/// assert_eq!(role.permissions().len(), 2);
/// ```
#[macro_export]
macro_rules! role_definition {
    (
        name: $name:expr,
        level: $level:expr,
        $(description: $desc:expr,)?
        $(inherits: [$($parent:expr),* $(,)?],)?
        permissions: [
            $($action:literal => $resource:literal $(if [$($condition:literal),+ $(,)?])?),* $(,)?
        ] $(,)?
    ) => {
        $crate::role::RoleDefinition::new($name, $level)
            $(.with_description($desc))?
            $($(.inherits_from($parent))*)?
            $(.add_permission(
                $crate::permission::Permission::new($action, $resource)
                    $($(.and_condition($condition))+)?
            ))*
    };
}
