//! Application routes and the access each one requires.

use std::fmt;

use serde::Serialize;

use super::{Access, Permission};

/// Where a denied user is sent.
pub const DENIED_REDIRECT: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    Dashboard,
    Plans,
    Cases,
    Executions,
    AiGenerator,
    History,
    Reports,
    ModelControl,
    UserManagement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "permission", rename_all = "snake_case")]
pub enum Requirement {
    /// Any signed-in user.
    Authenticated,
    Permission(Permission),
    /// Admin or master role.
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "to", rename_all = "snake_case")]
pub enum Gate {
    Allow,
    Redirect(&'static str),
}

impl Route {
    pub const ALL: [Route; 9] = [
        Self::Dashboard,
        Self::Plans,
        Self::Cases,
        Self::Executions,
        Self::AiGenerator,
        Self::History,
        Self::Reports,
        Self::ModelControl,
        Self::UserManagement,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::Dashboard => "/",
            Self::Plans => "/plans",
            Self::Cases => "/cases",
            Self::Executions => "/executions",
            Self::AiGenerator => "/ai-generator",
            Self::History => "/history",
            Self::Reports => "/reports",
            Self::ModelControl => "/model-control",
            Self::UserManagement => "/user-management",
        }
    }

    pub fn from_path(path: &str) -> Option<Route> {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        Self::ALL.into_iter().find(|r| r.path() == trimmed)
    }

    pub fn requirement(self) -> Requirement {
        match self {
            Self::Dashboard => Requirement::Authenticated,
            Self::Plans => Requirement::Permission(Permission::ManagePlans),
            Self::Cases => Requirement::Permission(Permission::ManageCases),
            Self::Executions => Requirement::Permission(Permission::ManageExecutions),
            Self::AiGenerator => Requirement::Permission(Permission::UseAi),
            Self::History | Self::Reports => Requirement::Permission(Permission::ViewReports),
            Self::ModelControl => Requirement::Admin,
            Self::UserManagement => Requirement::Permission(Permission::ManageUsers),
        }
    }

    pub fn gate(self, access: &Access) -> Gate {
        let allowed = match self.requirement() {
            Requirement::Authenticated => true,
            Requirement::Permission(p) => access.has_permission(p),
            Requirement::Admin => access.is_admin(),
        };
        if allowed {
            Gate::Allow
        } else {
            Gate::Redirect(DENIED_REDIRECT)
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
