//! Session endpoints: current principal and logout.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{error, info};

use super::{principal::require_auth, state::AuthState, utils::ClientIp};

/// `GET /{app}/api/session`: the logged-in principal, or 204.
pub async fn session(
    headers: HeaderMap,
    ClientIp(ip): ClientIp,
    Extension(state): Extension<Arc<AuthState>>,
) -> Response {
    let sessions = state.sessions();
    let session = match sessions.start(&headers, ip.as_deref()).await {
        Ok(session) => session,
        Err(err) => {
            error!("Failed to start session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Anonymous callers get no cookie and nothing is stored for them.
    let Ok(principal) = require_auth(&session) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    if let Err(err) = sessions.save(&session).await {
        error!("Failed to save session: {err}");
    }
    (StatusCode::OK, Json(principal)).into_response()
}

/// `GET|POST /{app}/logout`: destroy the session and return to the login page.
pub async fn logout(
    headers: HeaderMap,
    ClientIp(ip): ClientIp,
    Extension(state): Extension<Arc<AuthState>>,
) -> Response {
    let app = state.app();
    let sessions = state.sessions();

    match sessions.start(&headers, ip.as_deref()).await {
        Ok(session) => {
            if let Some(principal) = session.principal() {
                info!(
                    user_id = principal.user_id,
                    username = %principal.username,
                    "{app} logout"
                );
            }
            if let Err(err) = sessions.destroy(&session).await {
                error!("Failed to destroy session: {err}");
            }
        }
        Err(err) => error!("Failed to start session: {err}"),
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response = Redirect::to(&app.login_page()).into_response();
    match sessions.clear_cookie() {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    response
}
