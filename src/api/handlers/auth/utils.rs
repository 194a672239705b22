//! Small helpers for login validation and request metadata.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header::USER_AGENT, request::Parts},
};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use super::state::AuthState;

const MAX_USER_AGENT_LEN: usize = 255;

/// Store codes are short alphanumeric identifiers.
pub(crate) fn valid_store_code(code: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9]{1,20}$").is_ok_and(|regex| regex.is_match(code))
}

/// Usernames allow letters, digits and underscores.
pub(crate) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_]{3,50}$").is_ok_and(|regex| regex.is_match(username))
}

/// Lowercase hex SHA-256 digest, the format stored in `kds_users.password_hash`.
pub(crate) fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Extract a client IP from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// User agent, truncated to the column width.
pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.chars().take(MAX_USER_AGENT_LEN).collect())
}

/// Client address: the peer socket from connect info. `X-Forwarded-For` and
/// `X-Real-IP` are only consulted when the app trusts proxy headers, since any
/// client can set them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trust_proxy = parts
            .extensions
            .get::<Arc<AuthState>>()
            .is_some_and(|state| state.config().trust_proxy_headers());
        let forwarded = if trust_proxy {
            extract_client_ip(&parts.headers)
        } else {
            None
        };
        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        Ok(Self(ip))
    }
}
