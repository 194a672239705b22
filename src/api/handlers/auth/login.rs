//! Form login for the KDS and POS.
//!
//! Flow Overview:
//! 1) Verify the CSRF token held in the session.
//! 2) Validate field presence and format.
//! 3) Consult the rate limiter for the app's attempt scope.
//! 4) Resolve the store, then the user inside it, and compare password digests.
//! 5) On success: clear attempts, regenerate the session id and CSRF token,
//!    store the principal, touch `last_login_at` and (POS) run the daily reset.
//!
//! Every outcome is a `303` redirect that carries the session cookie: home on
//! success, the login page with `?error=<code>` otherwise. Other methods are
//! sent to the login page.

use axum::{
    Form,
    extract::{Extension, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, Method, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    csrf,
    principal::{Principal, Role},
    state::AuthState,
    types::{LoginError, LoginForm},
    utils::{ClientIp, constant_time_eq, hash_password, user_agent, valid_store_code, valid_username},
};
use crate::{api::handlers::daily_reset, session::Session};

/// Redirect target for a login outcome.
fn location(state: &AuthState, outcome: Result<(), LoginError>) -> String {
    let app = state.app();
    match outcome {
        Ok(()) => app.home_page(),
        Err(err) => format!("{}?error={}", app.login_page(), err.code()),
    }
}

fn redirect(location: &str, cookie: Option<HeaderValue>) -> Response {
    let mut response = Redirect::to(location).into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

pub async fn login(
    method: Method,
    headers: HeaderMap,
    ClientIp(ip): ClientIp,
    Extension(state): Extension<Arc<AuthState>>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let sessions = state.sessions();
    let mut session = match sessions.start(&headers, ip.as_deref()).await {
        Ok(session) => session,
        Err(err) => {
            error!("Failed to start session: {err}");
            return redirect(&location(&state, Err(LoginError::SystemError)), None);
        }
    };

    if method != Method::POST {
        if let Err(err) = sessions.save(&session).await {
            error!("Failed to save session: {err}");
        }
        return redirect(&state.app().login_page(), session_cookie(&state, &session));
    }

    let form = form.map(|Form(form)| form).unwrap_or_default();
    let user_agent = user_agent(&headers);
    let mut outcome = authenticate(
        &state,
        &mut session,
        &form,
        ip.as_deref(),
        user_agent.as_deref(),
    )
    .await;

    if let Err(err) = sessions.save(&session).await {
        error!("Failed to save session: {err}");
        outcome = Err(LoginError::SystemError);
    }

    redirect(&location(&state, outcome), session_cookie(&state, &session))
}

fn session_cookie(state: &AuthState, session: &Session) -> Option<HeaderValue> {
    state
        .sessions()
        .cookie(session)
        .map_err(|err| error!("Failed to build session cookie: {err}"))
        .ok()
}

async fn authenticate(
    state: &AuthState,
    session: &mut Session,
    form: &LoginForm,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<(), LoginError> {
    let app = state.app();
    let ip_label = ip.unwrap_or("unknown");

    if !csrf::verify(
        session,
        form.csrf_token.as_deref(),
        state.config().csrf_token_expiry_seconds(),
    ) {
        warn!(ip = ip_label, "{app} login rejected: invalid CSRF token");
        return Err(LoginError::Csrf);
    }

    let store_code = form.store_code.as_deref().map(str::trim).unwrap_or_default();
    let username = form.username.as_deref().map(str::trim).unwrap_or_default();
    let password = form.password.as_deref().unwrap_or_default();
    if store_code.is_empty() || username.is_empty() || password.is_empty() {
        return Err(LoginError::MissingFields);
    }

    if !valid_store_code(store_code) || !valid_username(username) {
        warn!(ip = ip_label, "{app} login rejected: invalid field format");
        return Err(LoginError::InvalidFormat);
    }

    let limiter = state.rate_limiter();
    if let Err(err) = limiter.check(username, ip).await {
        warn!(username, ip = ip_label, "{app} login rate limited: {err}");
        return Err(LoginError::RateLimited);
    }

    let accounts = state.accounts();
    let store = accounts.find_store(store_code).await.map_err(|err| {
        error!("{app} login failed to load store: {err}");
        LoginError::SystemError
    })?;
    let user = match &store {
        Some(store) => accounts.find_user(store.id, username).await.map_err(|err| {
            error!("{app} login failed to load user: {err}");
            LoginError::SystemError
        })?,
        None => None,
    };

    let verified = user.as_ref().is_some_and(|user| {
        constant_time_eq(
            hash_password(password).as_bytes(),
            user.password_hash.trim().to_ascii_lowercase().as_bytes(),
        )
    });

    let (Some(store), Some(user), true) = (store, user, verified) else {
        limiter.record_failure(username, ip, user_agent).await;
        warn!(username, store_code, ip = ip_label, "{app} login failed: invalid credentials");
        return Err(LoginError::InvalidCredentials);
    };

    limiter.record_success(username, ip, user_agent).await;

    session.data.principal = Some(Principal {
        user_id: user.id,
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        role: Role::parse(&user.role),
        store_id: store.id,
        store_code: store.store_code.clone(),
        store_name: store.store_name.clone(),
    });
    state.sessions().regenerate(session).await.map_err(|err| {
        error!("{app} login failed to regenerate session: {err}");
        LoginError::SystemError
    })?;
    csrf::regenerate(session).map_err(|err| {
        error!("{app} login failed to regenerate CSRF token: {err}");
        LoginError::SystemError
    })?;

    if let Err(err) = accounts.touch_last_login(user.id).await {
        error!("Failed to update last login for user {}: {err}", user.id);
    }

    if app.resets_daily_availability() {
        if let Err(err) = daily_reset::run(
            accounts,
            store.id,
            state.config().business_timezone(),
            store.eod_cutoff_hour,
            Utc::now(),
            false,
        )
        .await
        {
            error!(store_id = store.id, "Daily availability reset failed: {err}");
        }
    }

    info!(
        user_id = user.id,
        username,
        store_id = store.id,
        role = %user.role,
        ip = ip_label,
        "{app} login successful"
    );
    Ok(())
}
