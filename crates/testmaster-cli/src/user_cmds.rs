//! `testmaster user`: roles and capability flags.

use anyhow::Result;

use testmaster_core::permission::{Access, Permission};

use crate::UserCommands;
use crate::context::AppContext;

pub async fn run_user_command(command: UserCommands, ctx: &AppContext) -> Result<()> {
    match command {
        UserCommands::Show { user } => {
            let me = ctx.access().await?;
            let access = match user {
                Some(target) if target != me.user_id => {
                    testmaster_core::permission::require(&me, Permission::ManageUsers)?;
                    ctx.resolver.resolve(target).await
                }
                _ => me,
            };
            print!("{}", describe(&access));
            Ok(())
        }
        UserCommands::List => {
            ctx.require(Permission::ManageUsers).await?;
            let users = ctx.storage.list_users().await?;
            println!("{:<36}  {:<8}  EMAIL", "USER", "ROLE");
            for u in users {
                println!(
                    "{:<36}  {:<8}  {}",
                    u.user_id,
                    u.role.to_string(),
                    u.email.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        UserCommands::SetRole { user, role } => {
            let actor = ctx.access().await?;
            ctx.resolver.set_role(&actor, user, role).await?;
            println!("User {user} is now {role}.");
            Ok(())
        }
        UserCommands::Grant { user, permission } => {
            let actor = ctx.access().await?;
            ctx.resolver.set_permission(&actor, user, permission, true).await?;
            println!("Granted {permission} to {user}.");
            Ok(())
        }
        UserCommands::Revoke { user, permission } => {
            let actor = ctx.access().await?;
            ctx.resolver.set_permission(&actor, user, permission, false).await?;
            println!("Revoked {permission} from {user}.");
            Ok(())
        }
    }
}

pub fn describe(access: &Access) -> String {
    let mut out = format!("User: {}\nRole: {}\n", access.user_id, access.role);
    if access.degraded {
        out.push_str("(permissions could not be loaded; showing fallback access)\n");
    }
    out.push_str("Permissions:\n");
    for permission in Permission::ALL {
        let mark = if access.has_permission(permission) { "x" } else { " " };
        out.push_str(&format!("  [{mark}] {permission}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use testmaster_db::models::{PermissionFlags, Role};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn admin_shows_every_permission() {
        let access = Access {
            user_id: Uuid::nil(),
            role: Role::Admin,
            flags: PermissionFlags::none(),
            degraded: false,
        };
        let text = describe(&access);
        assert_eq!(text.matches("[x]").count(), Permission::ALL.len());
        assert!(!text.contains("fallback"));
    }

    #[test]
    fn degraded_access_is_flagged() {
        let access = Access {
            user_id: Uuid::nil(),
            role: Role::Tester,
            flags: PermissionFlags::tester_default(),
            degraded: true,
        };
        let text = describe(&access);
        assert!(text.contains("fallback access"));
        assert!(text.contains("[ ] manage_users"));
        assert!(text.contains("[x] use_ai"));
    }
}
