//! Capability checks
//!
//! Every service asks one question before it mutates anything:
//! `can(user, action, resource)`. The policy lives behind [`Authorizer`] so a
//! deployment can swap it without touching the services.

use shared::Role;
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ViewStock,
    PostDelivery,
    PostIssue,
    CreateTransfer,
    ApproveTransfer,
    RejectTransfer,
    ViewTransfer,
    CreateNcr,
    UpdateNcrStatus,
    ViewNcr,
    ViewReconciliation,
    SaveReconciliation,
    MarkLocationReady,
    ManagePeriod,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ViewStock => "stock:view",
            Action::PostDelivery => "delivery:post",
            Action::PostIssue => "issue:post",
            Action::CreateTransfer => "transfer:create",
            Action::ApproveTransfer => "transfer:approve",
            Action::RejectTransfer => "transfer:reject",
            Action::ViewTransfer => "transfer:view",
            Action::CreateNcr => "ncr:create",
            Action::UpdateNcrStatus => "ncr:update_status",
            Action::ViewNcr => "ncr:view",
            Action::ViewReconciliation => "reconciliation:view",
            Action::SaveReconciliation => "reconciliation:save",
            Action::MarkLocationReady => "period:mark_ready",
            Action::ManagePeriod => "period:manage",
        }
    }

    /// Least role allowed to perform the action somewhere
    pub fn minimum_role(&self) -> Role {
        match self {
            Action::ViewStock
            | Action::PostDelivery
            | Action::PostIssue
            | Action::CreateTransfer
            | Action::ViewTransfer
            | Action::CreateNcr
            | Action::ViewNcr
            | Action::ViewReconciliation => Role::Operator,
            Action::ApproveTransfer
            | Action::RejectTransfer
            | Action::UpdateNcrStatus
            | Action::SaveReconciliation
            | Action::MarkLocationReady => Role::Supervisor,
            Action::ManagePeriod => Role::Admin,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an action is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Role capability only, before the target is known
    Any,
    Location(Uuid),
    /// A transfer is reachable from either end
    Transfer { from: Uuid, to: Uuid },
}

pub trait Authorizer: Send + Sync {
    fn can(&self, user: &AuthUser, action: Action, resource: Resource) -> bool;

    /// `can`, turned into the matching error
    fn require(&self, user: &AuthUser, action: Action, resource: Resource) -> AppResult<()> {
        if self.can(user, action, Resource::Any) && !self.can(user, action, resource) {
            return Err(match resource {
                Resource::Location(location_id) => AppError::LocationAccessDenied(location_id),
                Resource::Transfer { from, .. } => AppError::LocationAccessDenied(from),
                Resource::Any => AppError::Forbidden(action.to_string()),
            });
        }
        if !self.can(user, action, resource) {
            return Err(AppError::Forbidden(format!(
                "{} requires role {} or higher",
                action,
                action.minimum_role()
            )));
        }
        Ok(())
    }
}

/// Role ladder OPERATOR < SUPERVISOR < ADMIN plus location scoping
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

fn rank(role: Role) -> u8 {
    match role {
        Role::Operator => 0,
        Role::Supervisor => 1,
        Role::Admin => 2,
    }
}

impl Authorizer for RoleAuthorizer {
    fn can(&self, user: &AuthUser, action: Action, resource: Resource) -> bool {
        if rank(user.role) < rank(action.minimum_role()) {
            return false;
        }

        match resource {
            Resource::Any => true,
            Resource::Location(location_id) => user.has_location_access(location_id),
            Resource::Transfer { from, to } => {
                user.has_location_access(from) || user.has_location_access(to)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, locations: Vec<Uuid>) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            role,
            location_ids: locations,
        }
    }

    #[test]
    fn test_operator_cannot_approve() {
        let kitchen = Uuid::new_v4();
        let operator = user(Role::Operator, vec![kitchen]);
        assert!(!RoleAuthorizer.can(&operator, Action::ApproveTransfer, Resource::Location(kitchen)));
        assert!(RoleAuthorizer.can(&operator, Action::CreateTransfer, Resource::Location(kitchen)));
    }

    #[test]
    fn test_location_scoping() {
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let supervisor = user(Role::Supervisor, vec![mine]);

        assert!(RoleAuthorizer.can(&supervisor, Action::ApproveTransfer, Resource::Transfer { from: theirs, to: mine }));
        assert!(!RoleAuthorizer.can(&supervisor, Action::PostDelivery, Resource::Location(theirs)));
        assert!(matches!(
            RoleAuthorizer.require(&supervisor, Action::PostDelivery, Resource::Location(theirs)),
            Err(AppError::LocationAccessDenied(id)) if id == theirs
        ));
    }

    #[test]
    fn test_admin_reaches_everything() {
        let admin = user(Role::Admin, vec![]);
        assert!(RoleAuthorizer.can(&admin, Action::ManagePeriod, Resource::Any));
        assert!(RoleAuthorizer.can(&admin, Action::SaveReconciliation, Resource::Location(Uuid::new_v4())));
    }

    #[test]
    fn test_only_admin_manages_periods() {
        let supervisor = user(Role::Supervisor, vec![]);
        assert!(matches!(
            RoleAuthorizer.require(&supervisor, Action::ManagePeriod, Resource::Any),
            Err(AppError::Forbidden(_))
        ));
    }
}
