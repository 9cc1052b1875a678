use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db::models::{ADMIN_GROUP, ORGANIZER_GROUP};
use crate::db::Role;
use crate::error::AppError;

impl AuthenticatedUser {
    pub fn is_superuser(&self) -> bool {
        self.role == Role::Superuser
    }

    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|group| group == name)
    }

    pub fn is_admin(&self) -> bool {
        self.in_group(ADMIN_GROUP)
    }

    pub fn is_organizer(&self) -> bool {
        self.in_group(ORGANIZER_GROUP)
    }

    /// Admin group member or superuser.
    pub fn is_staff(&self) -> bool {
        self.is_admin() || self.is_superuser()
    }
}

/// Route-level access policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Authenticated,
    AdminOrSuperuser,
    OrganizerAdminOrSuperuser,
    SuperuserOnly,
}

impl Access {
    pub fn allows(self, user: &AuthenticatedUser) -> bool {
        match self {
            Access::Authenticated => true,
            Access::AdminOrSuperuser => user.is_staff(),
            Access::OrganizerAdminOrSuperuser => user.is_organizer() || user.is_staff(),
            Access::SuperuserOnly => user.is_superuser(),
        }
    }

    /// `PermissionDenied` (403) when the user falls outside the policy.
    pub fn check(self, user: &AuthenticatedUser) -> Result<(), AppError> {
        if self.allows(user) {
            Ok(())
        } else {
            tracing::warn!(
                "Permission denied for {} ({:?} required)",
                user.username,
                self
            );
            Err(AppError::forbidden())
        }
    }
}

/// Admins and superusers manage any event; organizers only their own.
pub fn can_manage_event(user: &AuthenticatedUser, organizer_id: Uuid) -> bool {
    user.is_staff() || (user.is_organizer() && user.id == organizer_id)
}

pub fn can_edit_profile(user: &AuthenticatedUser, target_id: Uuid) -> bool {
    user.id == target_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, groups: &[&str]) -> AuthenticatedUser {
        AuthenticatedUser {
            id: Uuid::new_v4(),
            username: "someone".to_string(),
            role,
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn test_policies() {
        let plain = user(Role::User, &[]);
        let organizer = user(Role::User, &[ORGANIZER_GROUP]);
        let admin = user(Role::User, &[ADMIN_GROUP]);
        let root = user(Role::Superuser, &[]);

        assert!(Access::Authenticated.allows(&plain));

        assert!(!Access::AdminOrSuperuser.allows(&plain));
        assert!(!Access::AdminOrSuperuser.allows(&organizer));
        assert!(Access::AdminOrSuperuser.allows(&admin));
        assert!(Access::AdminOrSuperuser.allows(&root));

        assert!(!Access::OrganizerAdminOrSuperuser.allows(&plain));
        assert!(Access::OrganizerAdminOrSuperuser.allows(&organizer));
        assert!(Access::OrganizerAdminOrSuperuser.allows(&admin));
        assert!(Access::OrganizerAdminOrSuperuser.allows(&root));

        assert!(!Access::SuperuserOnly.allows(&admin));
        assert!(Access::SuperuserOnly.allows(&root));
        assert!(Access::SuperuserOnly.check(&organizer).is_err());
    }

    #[test]
    fn test_event_ownership() {
        let organizer = user(Role::User, &[ORGANIZER_GROUP]);
        let other_organizer = user(Role::User, &[ORGANIZER_GROUP]);
        let admin = user(Role::User, &[ADMIN_GROUP]);
        let plain = user(Role::User, &[]);

        assert!(can_manage_event(&organizer, organizer.id));
        assert!(!can_manage_event(&other_organizer, organizer.id));
        assert!(can_manage_event(&admin, organizer.id));
        // Owning an event without the organizer role is not enough.
        assert!(!can_manage_event(&plain, plain.id));
    }

    #[test]
    fn test_profile_edit_is_self_only() {
        let me = user(Role::User, &[]);
        let root = user(Role::Superuser, &[ADMIN_GROUP]);
        assert!(can_edit_profile(&me, me.id));
        assert!(!can_edit_profile(&root, me.id));
    }
}
