use serde::Deserialize;

/// Login form as posted by the KDS and POS login pages.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub csrf_token: Option<String>,
    pub store_code: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Why a login was refused; rendered as `?error=<code>` on the login page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("invalid CSRF token")]
    Csrf,
    #[error("missing login fields")]
    MissingFields,
    #[error("invalid store code or username format")]
    InvalidFormat,
    #[error("too many failed attempts")]
    RateLimited,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("system error")]
    SystemError,
}

impl LoginError {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Csrf => "csrf",
            Self::MissingFields => "missing_fields",
            Self::InvalidFormat => "invalid_format",
            Self::RateLimited => "rate_limit",
            Self::InvalidCredentials => "invalid_credentials",
            Self::SystemError => "system_error",
        }
    }
}
