//! Runtime configuration shared by the CLI and the server.

pub mod env_file;

use anyhow::{Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Deployment environment, mirrors `APP_ENV`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEnv {
    Production,
    Development,
}

impl AppEnv {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Self::Development,
            _ => Self::Production,
        }
    }

    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Database settings when no DSN is given: the `DB_*` variables.
#[derive(Clone)]
pub struct DatabaseParts {
    pub host: String,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: SecretString,
}

impl std::fmt::Debug for DatabaseParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseParts")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Resolve the Postgres DSN. An explicit DSN wins over the `DB_*` parts.
///
/// # Errors
/// Returns an error if neither a DSN nor a complete set of parts is available.
pub fn resolve_dsn(dsn: Option<&str>, parts: &DatabaseParts) -> Result<SecretString> {
    if let Some(dsn) = dsn.map(str::trim).filter(|dsn| !dsn.is_empty()) {
        Url::parse(dsn).map_err(|err| anyhow!("Invalid database DSN: {err}"))?;
        return Ok(SecretString::from(dsn.to_string()));
    }

    let name = parts.name.as_deref().filter(|value| !value.is_empty());
    let user = parts.user.as_deref().filter(|value| !value.is_empty());
    let (Some(name), Some(user)) = (name, user) else {
        return Err(anyhow!(
            "Database configuration incomplete: db_name {}, db_user {}",
            if name.is_some() { "set" } else { "missing" },
            if user.is_some() { "set" } else { "missing" },
        ));
    };

    let mut url = Url::parse(&format!("postgres://{}/{name}", parts.host))
        .map_err(|err| anyhow!("Invalid database host {}: {err}", parts.host))?;
    url.set_username(user)
        .map_err(|()| anyhow!("Error setting username"))?;
    let password = parts.password.expose_secret();
    if !password.is_empty() {
        url.set_password(Some(password))
            .map_err(|()| anyhow!("Error setting password"))?;
    }

    Ok(SecretString::from(url.to_string()))
}
