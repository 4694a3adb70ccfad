//! Authorization helpers over [`ToolContext`].

use proto::{ToolContext, ToolError};

/// Role and scope checks providers run before acting.
pub trait Permissions {
    /// Returns `true` when the caller holds `role` (case-insensitive).
    fn has_role(&self, role: &str) -> bool;
    /// Fails with [`ToolError::PermissionDenied`] unless the caller holds `role`.
    fn require_role(&self, role: &str) -> Result<(), ToolError>;
    /// Fails unless the caller holds at least one of `roles`.
    fn require_any_role(&self, roles: &[&str]) -> Result<(), ToolError>;
    /// Returns the guild id, failing when the request has no guild scope.
    fn require_guild(&self) -> Result<&str, ToolError>;
}

impl Permissions for ToolContext {
    fn has_role(&self, role: &str) -> bool {
        self.user_roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    fn require_role(&self, role: &str) -> Result<(), ToolError> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(ToolError::PermissionDenied(format!(
                "user {} lacks role '{role}'",
                self.user_id
            )))
        }
    }

    fn require_any_role(&self, roles: &[&str]) -> Result<(), ToolError> {
        if roles.iter().any(|role| self.has_role(role)) {
            Ok(())
        } else {
            Err(ToolError::PermissionDenied(format!(
                "user {} needs one of: {}",
                self.user_id,
                roles.join(", ")
            )))
        }
    }

    fn require_guild(&self) -> Result<&str, ToolError> {
        self.guild_id
            .as_deref()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| ToolError::PermissionDenied("this tool requires a guild context".into()))
    }
}
