//! Server-side sessions behind an opaque cookie.
//!
//! Flow Overview:
//! 1) `start` reads the app cookie and resolves it against the store by hash.
//! 2) Unknown, expired or (optionally) IP-mismatched ids are dropped and a fresh
//!    session with a server-generated id takes their place.
//! 3) Handlers mutate the session and call `save`; `regenerate` swaps the id on
//!    privilege changes, `destroy` removes it on logout.
//!
//! Security boundaries: the store only ever sees `SHA-256(id)`, and the cookie
//! is `HttpOnly` + `SameSite=Strict`.

mod memory;

pub use memory::MemorySessionStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::handlers::auth::principal::Principal;

const PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// A CSRF token bound to one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

/// Everything kept server-side for a session.
#[derive(Clone, Debug)]
pub struct SessionData {
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub csrf: Option<CsrfToken>,
    pub principal: Option<Principal>,
}

impl SessionData {
    fn new(now: DateTime<Utc>, client_ip: Option<&str>) -> Self {
        Self {
            created_at: now,
            last_activity: now,
            client_ip: client_ip.map(ToString::to_string),
            csrf: None,
            principal: None,
        }
    }
}

/// A live session: the raw id (only ever sent back in the cookie) plus data.
#[derive(Clone, Debug)]
pub struct Session {
    id: String,
    pub data: SessionData,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.data.principal.is_some()
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.data.principal.as_ref()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id_hash: &[u8]) -> Result<Option<SessionData>>;
    async fn save(&self, id_hash: Vec<u8>, data: SessionData) -> Result<()>;
    async fn remove(&self, id_hash: &[u8]) -> Result<()>;
    /// Remove sessions created before `cutoff`; returns how many were removed.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    cookie_name: String,
    lifetime_seconds: i64,
    cookie_secure: bool,
    bind_to_ip: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new(cookie_name: &str, lifetime_seconds: i64) -> Self {
        Self {
            cookie_name: cookie_name.to_string(),
            lifetime_seconds,
            cookie_secure: false,
            bind_to_ip: false,
        }
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_bind_to_ip(mut self, bind: bool) -> Self {
        self.bind_to_ip = bind;
        self
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn lifetime_seconds(&self) -> i64 {
        self.lifetime_seconds
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        Self { config, store }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lifetime(&self) -> Duration {
        Duration::seconds(self.config.lifetime_seconds)
    }

    /// Resolve the request cookie into a session, or start a fresh one.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or a new id cannot be generated.
    pub async fn start(&self, headers: &HeaderMap, client_ip: Option<&str>) -> Result<Session> {
        let now = Utc::now();

        if let Some(id) = extract_cookie(headers, &self.config.cookie_name) {
            let id_hash = hash_session_id(&id);
            if let Some(mut data) = self.store.load(&id_hash).await? {
                if now.signed_duration_since(data.created_at) > self.lifetime() {
                    debug!("Session expired, starting a new one");
                    self.store.remove(&id_hash).await?;
                } else if self.config.bind_to_ip
                    && data.client_ip.is_some()
                    && data.client_ip.as_deref() != client_ip
                {
                    warn!(
                        previous_ip = data.client_ip.as_deref().unwrap_or("unknown"),
                        ip = client_ip.unwrap_or("unknown"),
                        "Session client IP changed, destroying session"
                    );
                    self.store.remove(&id_hash).await?;
                } else {
                    data.last_activity = now;
                    if data.client_ip.is_none() {
                        data.client_ip = client_ip.map(ToString::to_string);
                    }
                    return Ok(Session { id, data });
                }
            }
        }

        Ok(Session {
            id: generate_session_id()?,
            data: SessionData::new(now, client_ip),
        })
    }

    /// Persist the session data.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn save(&self, session: &Session) -> Result<()> {
        self.store
            .save(hash_session_id(&session.id), session.data.clone())
            .await
    }

    /// Issue a new id for the session and drop the old one, keeping the data.
    ///
    /// # Errors
    /// Returns an error if the store cannot be updated.
    pub async fn regenerate(&self, session: &mut Session) -> Result<()> {
        let old_hash = hash_session_id(&session.id);
        self.store.remove(&old_hash).await?;

        let now = Utc::now();
        session.id = generate_session_id()?;
        session.data.created_at = now;
        session.data.last_activity = now;
        self.save(session).await?;

        info!("Session regenerated");
        Ok(())
    }

    /// Remove the session from the store.
    ///
    /// # Errors
    /// Returns an error if the store cannot be updated.
    pub async fn destroy(&self, session: &Session) -> Result<()> {
        self.store.remove(&hash_session_id(&session.id)).await?;
        info!("Session destroyed");
        Ok(())
    }

    /// `Set-Cookie` value carrying the session id.
    ///
    /// # Errors
    /// Returns an error if the cookie is not a valid header value.
    pub fn cookie(&self, session: &Session) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            self.config.cookie_name, session.id
        );
        if self.config.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// `Set-Cookie` value that expires the session cookie.
    ///
    /// # Errors
    /// Returns an error if the cookie is not a valid header value.
    pub fn clear_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0",
            self.config.cookie_name
        );
        if self.config.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Periodically drop sessions past their lifetime.
    pub fn spawn_purger(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let cutoff = Utc::now() - self.lifetime();
                match self.store.purge_created_before(cutoff).await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, cookie = %self.config.cookie_name, "Purged expired sessions"),
                    Err(err) => error!("Failed to purge sessions: {err}"),
                }
            }
        });
    }
}

/// Create a new random session id for the cookie.
fn generate_session_id() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session id")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session id so raw values never reach the store.
pub(crate) fn hash_session_id(id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.finalize().to_vec()
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == name && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::principal::Role;
    use axum::http::header::COOKIE;

    fn manager(config: SessionConfig) -> (SessionManager, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        (SessionManager::new(config, store.clone()), store)
    }

    fn cookie_headers(name: &str, id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("theme=dark; {name}={id}")) {
            headers.insert(COOKIE, value);
        }
        headers
    }

    fn principal() -> Principal {
        Principal {
            user_id: 7,
            username: "kitchen_lead".to_string(),
            display_name: "Kitchen Lead".to_string(),
            role: Role::Manager,
            store_id: 3,
            store_code: "VLC01".to_string(),
            store_name: "Valencia Centro".to_string(),
        }
    }

    #[test]
    fn extract_cookie_finds_named_value() {
        let headers = cookie_headers("KDS_SESSION", "abc");
        assert_eq!(extract_cookie(&headers, "KDS_SESSION"), Some("abc".to_string()));
        assert_eq!(extract_cookie(&headers, "POS_SESSION"), None);
        assert_eq!(extract_cookie(&HeaderMap::new(), "KDS_SESSION"), None);
    }

    #[test]
    fn session_ids_are_random_and_hashed() -> Result<()> {
        let first = generate_session_id()?;
        let second = generate_session_id()?;
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert_eq!(hash_session_id(&first), hash_session_id(&first));
        assert_eq!(hash_session_id(&first).len(), 32);
        Ok(())
    }

    #[tokio::test]
    async fn start_without_cookie_creates_fresh_session() -> Result<()> {
        let (sessions, _store) = manager(SessionConfig::new("KDS_SESSION", 3600));
        let session = sessions.start(&HeaderMap::new(), Some("10.0.0.1")).await?;
        assert!(!session.is_logged_in());
        assert_eq!(session.data.client_ip.as_deref(), Some("10.0.0.1"));
        Ok(())
    }

    #[tokio::test]
    async fn start_ignores_unknown_ids() -> Result<()> {
        let (sessions, _store) = manager(SessionConfig::new("KDS_SESSION", 3600));
        let headers = cookie_headers("KDS_SESSION", "attacker-chosen");
        let session = sessions.start(&headers, None).await?;
        assert_ne!(session.id(), "attacker-chosen");
        Ok(())
    }

    #[tokio::test]
    async fn saved_session_is_resumed() -> Result<()> {
        let (sessions, _store) = manager(SessionConfig::new("KDS_SESSION", 3600));
        let mut session = sessions.start(&HeaderMap::new(), None).await?;
        session.data.principal = Some(principal());
        sessions.save(&session).await?;

        let resumed = sessions
            .start(&cookie_headers("KDS_SESSION", session.id()), None)
            .await?;
        assert_eq!(resumed.id(), session.id());
        assert_eq!(resumed.principal(), Some(&principal()));
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_replaced() -> Result<()> {
        let (sessions, store) = manager(SessionConfig::new("POS_SESSION", 60));
        let mut session = sessions.start(&HeaderMap::new(), None).await?;
        session.data.principal = Some(principal());
        session.data.created_at = Utc::now() - Duration::seconds(61);
        sessions.save(&session).await?;

        let resumed = sessions
            .start(&cookie_headers("POS_SESSION", session.id()), None)
            .await?;
        assert_ne!(resumed.id(), session.id());
        assert!(!resumed.is_logged_in());
        assert!(store.load(&hash_session_id(session.id())).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn bound_session_is_dropped_when_ip_changes() -> Result<()> {
        let (sessions, _store) =
            manager(SessionConfig::new("POS_SESSION", 3600).with_bind_to_ip(true));
        let mut session = sessions.start(&HeaderMap::new(), Some("10.0.0.1")).await?;
        session.data.principal = Some(principal());
        sessions.save(&session).await?;

        let headers = cookie_headers("POS_SESSION", session.id());
        let same_ip = sessions.start(&headers, Some("10.0.0.1")).await?;
        assert!(same_ip.is_logged_in());

        let other_ip = sessions.start(&headers, Some("10.0.0.2")).await?;
        assert!(!other_ip.is_logged_in());
        Ok(())
    }

    #[tokio::test]
    async fn regenerate_moves_data_to_new_id() -> Result<()> {
        let (sessions, store) = manager(SessionConfig::new("KDS_SESSION", 3600));
        let mut session = sessions.start(&HeaderMap::new(), None).await?;
        sessions.save(&session).await?;
        let old_id = session.id().to_string();

        session.data.principal = Some(principal());
        sessions.regenerate(&mut session).await?;

        assert_ne!(session.id(), old_id);
        assert!(store.load(&hash_session_id(&old_id)).await?.is_none());
        let stored = store.load(&hash_session_id(session.id())).await?;
        assert_eq!(stored.and_then(|data| data.principal), Some(principal()));
        Ok(())
    }

    #[tokio::test]
    async fn destroy_removes_session() -> Result<()> {
        let (sessions, store) = manager(SessionConfig::new("KDS_SESSION", 3600));
        let session = sessions.start(&HeaderMap::new(), None).await?;
        sessions.save(&session).await?;
        sessions.destroy(&session).await?;
        assert!(store.load(&hash_session_id(session.id())).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cookies_carry_secure_defaults() -> Result<()> {
        let (sessions, _store) =
            manager(SessionConfig::new("POS_SESSION", 3600).with_cookie_secure(true));
        let session = sessions.start(&HeaderMap::new(), None).await?;

        let cookie = sessions.cookie(&session)?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with(&format!("POS_SESSION={}", session.id())));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(!cookie.contains("Max-Age"));

        let cleared = sessions.clear_cookie()?;
        assert!(cleared.to_str()?.contains("Max-Age=0"));
        Ok(())
    }
}
