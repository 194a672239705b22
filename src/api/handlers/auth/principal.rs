//! Authenticated principal and role checks.
//!
//! Flow Overview: login stores a `Principal` in the session; later requests
//! resolve the session cookie and call `require_auth` before touching any
//! handler. Role checks run in the gateway against the resource's role.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Staff role as stored in `kds_users.role`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Staff,
    Manager,
    Other(String),
}

impl Role {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "staff" => Self::Staff,
            "manager" => Self::Manager,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Staff => "staff",
            Self::Manager => "manager",
            Self::Other(role) => role,
        }
    }

    /// `manager` satisfies every requirement; anything else must match exactly.
    #[must_use]
    pub fn satisfies(&self, required: &Self) -> bool {
        *self == Self::Manager || self == required
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Authenticated user context kept in the session after login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub store_id: i64,
    pub store_code: String,
    pub store_name: String,
}

/// Return the session principal, or 401 when nobody is logged in.
///
/// # Errors
/// Returns `StatusCode::UNAUTHORIZED` for anonymous sessions.
pub fn require_auth(session: &Session) -> Result<&Principal, StatusCode> {
    session.principal().ok_or(StatusCode::UNAUTHORIZED)
}
