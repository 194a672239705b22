//! Auth state and configuration, one `AuthState` per mounted app.

use chrono_tz::Tz;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{
    rate_limit::{LoginRateLimiter, RateLimitPolicy},
    storage::{AccountStore, AttemptLedger},
};
use crate::{
    api::app::App,
    config::AppEnv,
    session::{SessionConfig, SessionManager, SessionStore},
};

const DEFAULT_CSRF_TOKEN_EXPIRY_SECONDS: i64 = 3600;
const DEFAULT_LOGIN_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_LOGIN_LOCKOUT_MINUTES: i64 = 15;
const DEFAULT_BUSINESS_TIMEZONE: Tz = chrono_tz::Europe::Madrid;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    app_env: AppEnv,
    debug: bool,
    session_lifetime_seconds: Option<i64>,
    session_cookie_secure: bool,
    session_bind_ip: bool,
    csrf_token_expiry_seconds: i64,
    login_max_attempts: i64,
    login_lockout_minutes: i64,
    business_timezone: Tz,
    trust_proxy_headers: bool,
    images_dir: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(AppEnv::Production)
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(app_env: AppEnv) -> Self {
        Self {
            app_env,
            debug: false,
            session_lifetime_seconds: None,
            session_cookie_secure: false,
            session_bind_ip: false,
            csrf_token_expiry_seconds: DEFAULT_CSRF_TOKEN_EXPIRY_SECONDS,
            login_max_attempts: DEFAULT_LOGIN_MAX_ATTEMPTS,
            login_lockout_minutes: DEFAULT_LOGIN_LOCKOUT_MINUTES,
            business_timezone: DEFAULT_BUSINESS_TIMEZONE,
            trust_proxy_headers: false,
            images_dir: None,
        }
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Override the per-app session lifetime for both apps.
    #[must_use]
    pub fn with_session_lifetime_seconds(mut self, seconds: Option<i64>) -> Self {
        self.session_lifetime_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_cookie_secure(mut self, secure: bool) -> Self {
        self.session_cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_session_bind_ip(mut self, bind: bool) -> Self {
        self.session_bind_ip = bind;
        self
    }

    #[must_use]
    pub fn with_csrf_token_expiry_seconds(mut self, seconds: i64) -> Self {
        self.csrf_token_expiry_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_max_attempts(mut self, attempts: i64) -> Self {
        self.login_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_login_lockout_minutes(mut self, minutes: i64) -> Self {
        self.login_lockout_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_business_timezone(mut self, timezone: Tz) -> Self {
        self.business_timezone = timezone;
        self
    }

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`. Only
    /// enable behind a reverse proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Directory served by `/{app}/api/image`; the endpoint answers 404 without it.
    #[must_use]
    pub fn with_images_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.images_dir = dir;
        self
    }

    #[must_use]
    pub fn app_env(&self) -> AppEnv {
        self.app_env
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub fn csrf_token_expiry_seconds(&self) -> i64 {
        self.csrf_token_expiry_seconds
    }

    #[must_use]
    pub fn business_timezone(&self) -> Tz {
        self.business_timezone
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    #[must_use]
    pub fn images_dir(&self) -> Option<&Path> {
        self.images_dir.as_deref()
    }

    #[must_use]
    pub fn session_lifetime_seconds(&self, app: App) -> i64 {
        self.session_lifetime_seconds
            .unwrap_or_else(|| app.default_session_lifetime())
    }

    /// `Secure` is only set in production; development runs over plain HTTP.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure && self.app_env.is_production()
    }

    #[must_use]
    pub fn session_config(&self, app: App) -> SessionConfig {
        SessionConfig::new(app.cookie_name(), self.session_lifetime_seconds(app))
            .with_cookie_secure(self.session_cookie_secure())
            .with_bind_to_ip(self.session_bind_ip)
    }

    #[must_use]
    pub fn rate_limit_policy(&self, app: App) -> RateLimitPolicy {
        RateLimitPolicy::new(app.attempt_scope())
            .with_max_attempts(self.login_max_attempts)
            .with_window_minutes(self.login_lockout_minutes)
            .with_clear_failures_only(app == App::Pos)
    }
}

pub struct AuthState {
    app: App,
    config: AuthConfig,
    sessions: Arc<SessionManager>,
    accounts: Arc<dyn AccountStore>,
    rate_limiter: LoginRateLimiter,
}

impl AuthState {
    pub fn new(
        app: App,
        config: AuthConfig,
        session_store: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn AttemptLedger>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.session_config(app),
            session_store,
        ));
        let rate_limiter = LoginRateLimiter::new(ledger, config.rate_limit_policy(app));
        Self {
            app,
            config,
            sessions,
            accounts,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn app(&self) -> App {
        self.app
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &LoginRateLimiter {
        &self.rate_limiter
    }
}
