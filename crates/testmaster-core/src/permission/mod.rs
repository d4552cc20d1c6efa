//! Roles, capability flags, and what a user may do.
//!
//! Master and admin hold every permission regardless of their stored
//! flags. Everyone else gets exactly what is stored.

pub mod routes;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use testmaster_db::models::{PermissionFlags, Role};

use crate::storage::Storage;

pub use routes::{Gate, Requirement, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageUsers,
    ManagePlans,
    ManageCases,
    ManageExecutions,
    ViewReports,
    UseAi,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Self::ManageUsers,
        Self::ManagePlans,
        Self::ManageCases,
        Self::ManageExecutions,
        Self::ViewReports,
        Self::UseAi,
    ];

    pub fn is_set(self, flags: &PermissionFlags) -> bool {
        match self {
            Self::ManageUsers => flags.manage_users,
            Self::ManagePlans => flags.manage_plans,
            Self::ManageCases => flags.manage_cases,
            Self::ManageExecutions => flags.manage_executions,
            Self::ViewReports => flags.view_reports,
            Self::UseAi => flags.use_ai,
        }
    }

    pub fn set(self, flags: &mut PermissionFlags, value: bool) {
        let slot = match self {
            Self::ManageUsers => &mut flags.manage_users,
            Self::ManagePlans => &mut flags.manage_plans,
            Self::ManageCases => &mut flags.manage_cases,
            Self::ManageExecutions => &mut flags.manage_executions,
            Self::ViewReports => &mut flags.view_reports,
            Self::UseAi => &mut flags.use_ai,
        };
        *slot = value;
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ManageUsers => "manage_users",
            Self::ManagePlans => "manage_plans",
            Self::ManageCases => "manage_cases",
            Self::ManageExecutions => "manage_executions",
            Self::ViewReports => "view_reports",
            Self::UseAi => "use_ai",
        };
        f.write_str(s)
    }
}

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manage_users" => Ok(Self::ManageUsers),
            "manage_plans" => Ok(Self::ManagePlans),
            "manage_cases" => Ok(Self::ManageCases),
            "manage_executions" => Ok(Self::ManageExecutions),
            "view_reports" => Ok(Self::ViewReports),
            "use_ai" => Ok(Self::UseAi),
            other => Err(PermissionParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Permission`] string.
#[derive(Debug, Clone)]
pub struct PermissionParseError(pub String);

impl fmt::Display for PermissionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid permission: {:?}", self.0)
    }
}

impl std::error::Error for PermissionParseError {}

// ---------------------------------------------------------------------------
// Access
// ---------------------------------------------------------------------------

/// A user's resolved role and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub user_id: Uuid,
    pub role: Role,
    pub flags: PermissionFlags,
    /// Set when storage could not be read and the fallback policy applied.
    pub degraded: bool,
}

impl Access {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_admin() || permission.is_set(&self.flags)
    }

    /// Admin or master.
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Master)
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// Effective permissions after role overrides.
    pub fn effective(&self) -> Vec<Permission> {
        Permission::ALL
            .into_iter()
            .filter(|p| self.has_permission(*p))
            .collect()
    }
}

/// What a user gets when their role cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// The provisioning default: tester with the default flags.
    #[default]
    Tester,
    /// Tester with no flags at all.
    Deny,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("permission denied: {0} required")]
    Denied(Permission),

    #[error("only a master may grant or revoke the master role")]
    MasterOnly,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PermissionResolver {
    storage: Arc<dyn Storage>,
    fallback: FallbackPolicy,
}

impl PermissionResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    /// Resolve a user's access. Never fails: a user without a profile gets
    /// the provisioning default, a storage error gets the fallback policy.
    pub async fn resolve(&self, user_id: Uuid) -> Access {
        let role = self.storage.get_user_role(user_id).await;
        let flags = self.storage.get_user_permissions(user_id).await;

        match (role, flags) {
            (Ok(role), Ok(flags)) => Access {
                user_id,
                role: role.unwrap_or(Role::Tester),
                flags: flags.unwrap_or_else(PermissionFlags::tester_default),
                degraded: false,
            },
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(%user_id, error = %e, policy = ?self.fallback, "failed to load permissions, using fallback");
                self.fallback_access(user_id)
            }
        }
    }

    fn fallback_access(&self, user_id: Uuid) -> Access {
        let flags = match self.fallback {
            FallbackPolicy::Tester => PermissionFlags::tester_default(),
            FallbackPolicy::Deny => PermissionFlags::none(),
        };
        Access {
            user_id,
            role: Role::Tester,
            flags,
            degraded: true,
        }
    }

    /// Change `target`'s role on behalf of `actor`.
    pub async fn set_role(&self, actor: &Access, target: Uuid, role: Role) -> Result<(), AccessError> {
        require(actor, Permission::ManageUsers)?;
        if !actor.is_master() {
            let current = self.storage.get_user_role(target).await?;
            if role == Role::Master || current == Some(Role::Master) {
                return Err(AccessError::MasterOnly);
            }
        }
        self.storage.set_user_role(target, role).await?;
        tracing::info!(actor = %actor.user_id, %target, %role, "role changed");
        Ok(())
    }

    /// Grant or revoke one flag for `target` on behalf of `actor`. Returns
    /// the stored flags afterwards.
    pub async fn set_permission(
        &self,
        actor: &Access,
        target: Uuid,
        permission: Permission,
        granted: bool,
    ) -> Result<PermissionFlags, AccessError> {
        require(actor, Permission::ManageUsers)?;
        let mut flags = self
            .storage
            .get_user_permissions(target)
            .await?
            .unwrap_or_else(PermissionFlags::tester_default);
        permission.set(&mut flags, granted);
        self.storage.set_user_permissions(target, &flags).await?;
        tracing::info!(actor = %actor.user_id, %target, %permission, granted, "permission changed");
        Ok(flags)
    }
}

/// Fail with [`AccessError::Denied`] unless `access` holds `permission`.
pub fn require(access: &Access, permission: Permission) -> Result<(), AccessError> {
    if access.has_permission(permission) {
        Ok(())
    } else {
        Err(AccessError::Denied(permission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn access(role: Role, flags: PermissionFlags) -> Access {
        Access {
            user_id: Uuid::new_v4(),
            role,
            flags,
            degraded: false,
        }
    }

    #[test]
    fn permission_roundtrip() {
        for p in Permission::ALL {
            assert_eq!(p.to_string().parse::<Permission>().unwrap(), p);
        }
        assert!("fly".parse::<Permission>().is_err());
    }

    #[test]
    fn set_and_read_flags() {
        let mut flags = PermissionFlags::none();
        for p in Permission::ALL {
            assert!(!p.is_set(&flags));
            p.set(&mut flags, true);
            assert!(p.is_set(&flags));
        }
    }

    #[test]
    fn admin_and_master_override_stored_flags() {
        for role in [Role::Admin, Role::Master] {
            let a = access(role, PermissionFlags::none());
            for p in Permission::ALL {
                assert!(a.has_permission(p), "{role} should hold {p}");
            }
            assert!(a.is_admin());
        }
        let manager = access(Role::Manager, PermissionFlags::none());
        assert!(!manager.has_permission(Permission::ManagePlans));
        assert!(!manager.is_admin());

        let tester = access(Role::Tester, PermissionFlags::tester_default());
        assert!(tester.has_permission(Permission::UseAi));
        assert!(!tester.has_permission(Permission::ManageUsers));
        assert_eq!(tester.effective().len(), 5);
    }

    #[tokio::test]
    async fn unknown_user_gets_provisioning_default() {
        let resolver = PermissionResolver::new(Arc::new(MemoryStorage::new()));
        let a = resolver.resolve(Uuid::new_v4()).await;
        assert_eq!(a.role, Role::Tester);
        assert_eq!(a.flags, PermissionFlags::tester_default());
        assert!(!a.degraded);
    }

    #[tokio::test]
    async fn storage_failure_degrades_per_policy() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_unavailable(true);

        let lenient = PermissionResolver::new(storage.clone());
        let a = lenient.resolve(Uuid::new_v4()).await;
        assert!(a.degraded);
        assert_eq!(a.flags, PermissionFlags::tester_default());

        let strict = PermissionResolver::new(storage).with_fallback(FallbackPolicy::Deny);
        let a = strict.resolve(Uuid::new_v4()).await;
        assert!(a.degraded);
        assert_eq!(a.role, Role::Tester);
        assert!(a.effective().is_empty());
    }

    #[tokio::test]
    async fn user_management_requires_manage_users() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = PermissionResolver::new(storage.clone());
        let tester = access(Role::Tester, PermissionFlags::tester_default());
        let target = Uuid::new_v4();

        assert!(matches!(
            resolver.set_role(&tester, target, Role::Manager).await,
            Err(AccessError::Denied(Permission::ManageUsers))
        ));

        let admin = access(Role::Admin, PermissionFlags::none());
        resolver.set_role(&admin, target, Role::Manager).await.unwrap();
        assert_eq!(resolver.resolve(target).await.role, Role::Manager);

        let flags = resolver
            .set_permission(&admin, target, Permission::UseAi, false)
            .await
            .unwrap();
        assert!(!flags.use_ai);
        assert!(!resolver.resolve(target).await.has_permission(Permission::UseAi));
    }

    #[tokio::test]
    async fn only_master_touches_master_role() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = PermissionResolver::new(storage.clone());
        let admin = access(Role::Admin, PermissionFlags::none());
        let master = access(Role::Master, PermissionFlags::none());
        let target = Uuid::new_v4();

        assert!(matches!(
            resolver.set_role(&admin, target, Role::Master).await,
            Err(AccessError::MasterOnly)
        ));
        resolver.set_role(&master, target, Role::Master).await.unwrap();
        assert!(matches!(
            resolver.set_role(&admin, target, Role::Tester).await,
            Err(AccessError::MasterOnly)
        ));
    }
}
