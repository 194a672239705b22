//! Session-bound CSRF tokens.
//!
//! One token per session, 32 random bytes hex encoded. Tokens expire after
//! `CSRF_TOKEN_EXPIRY` seconds; `issue` replaces an expired token, `verify`
//! rejects it.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::{
    state::AuthState,
    utils::{ClientIp, constant_time_eq},
};
use crate::{
    api::gateway::response::{ApiError, Reply},
    session::{CsrfToken, Session},
};

/// Form / JSON field carrying the token.
pub const CSRF_FIELD: &str = "csrf_token";
/// Header carrying the token for XHR calls.
pub const CSRF_HEADER: &str = "x-csrf-token";

fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate CSRF token")?;
    Ok(hex::encode(bytes))
}

fn is_expired(token: &CsrfToken, expiry_seconds: i64) -> bool {
    Utc::now().signed_duration_since(token.issued_at) > Duration::seconds(expiry_seconds)
}

/// Current token, generating one when missing or expired.
///
/// # Errors
/// Returns an error if the random source fails.
pub fn issue(session: &mut Session, expiry_seconds: i64) -> Result<String> {
    if let Some(token) = session
        .data
        .csrf
        .as_ref()
        .filter(|token| !is_expired(token, expiry_seconds))
    {
        return Ok(token.value.clone());
    }
    regenerate(session)
}

/// Always replace the token.
///
/// # Errors
/// Returns an error if the random source fails.
pub fn regenerate(session: &mut Session) -> Result<String> {
    let value = generate_token()?;
    session.data.csrf = Some(CsrfToken {
        value: value.clone(),
        issued_at: Utc::now(),
    });
    Ok(value)
}

#[must_use]
pub fn verify(session: &Session, presented: Option<&str>, expiry_seconds: i64) -> bool {
    let (Some(token), Some(presented)) = (&session.data.csrf, presented) else {
        return false;
    };
    if is_expired(token, expiry_seconds) {
        return false;
    }
    constant_time_eq(token.value.as_bytes(), presented.as_bytes())
}

/// Token presented with a request: the body field wins over the header.
#[must_use]
pub fn presented_token<'a>(headers: &'a HeaderMap, field: Option<&'a str>) -> Option<&'a str> {
    field
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get(CSRF_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
        })
}

/// `GET /{app}/api/csrf`: hand the current token to the login page or SPA.
pub async fn csrf(
    headers: HeaderMap,
    ClientIp(ip): ClientIp,
    Extension(state): Extension<Arc<AuthState>>,
) -> Response {
    let sessions = state.sessions();
    let result = async {
        let mut session = sessions.start(&headers, ip.as_deref()).await?;
        let token = issue(&mut session, state.config().csrf_token_expiry_seconds())?;
        sessions.save(&session).await?;
        Ok::<_, anyhow::Error>((session, token))
    }
    .await;

    match result {
        Ok((session, token)) => {
            let mut response = Reply::new(json!({ "csrf_token": token })).into_response();
            match sessions.cookie(&session) {
                Ok(cookie) => {
                    response.headers_mut().insert(SET_COOKIE, cookie);
                }
                Err(err) => error!("Failed to build session cookie: {err}"),
            }
            response
        }
        Err(err) => ApiError::Internal(err).into_response_with(state.config().debug()),
    }
}
