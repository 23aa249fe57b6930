//! Tenant and user records carried by request and task scopes.

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};
use crate::locale::Locale;

/// A tenant is one hosted feedback board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub subdomain: String,
    /// Locale used when the request does not negotiate one.
    pub locale: Locale,
}

impl Tenant {
    pub fn new(id: TenantId, name: impl Into<String>, subdomain: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            subdomain: subdomain.into(),
            locale: Locale::default(),
        }
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }
}

/// Role of a user within its tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Visitor,
    Collaborator,
    Administrator,
}

/// An authenticated user acting within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl User {
    pub fn new(
        id: UserId,
        tenant_id: TenantId,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name: name.into(),
            email: email.into(),
            role: Role::Visitor,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}
