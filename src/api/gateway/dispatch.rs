//! `/{app}/api/gateway?res=<resource>&act=<action>`
//!
//! Checks run in a fixed order: session, CSRF (state-changing methods only),
//! routing parameters, resource, role, action, input. The first failing check
//! decides the response.

use axum::{
    body::Bytes,
    extract::{Extension, RawQuery},
    http::{HeaderMap, Method, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    registry::{ActionContext, ActionInput, Registry},
    response::ApiError,
};
use crate::api::handlers::auth::{AuthState, csrf, utils::ClientIp};

const RESOURCE_KEYS: [&str; 2] = ["res", "resource"];
const ACTION_KEYS: [&str; 2] = ["act", "action"];

pub(crate) fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn routing_value<'a>(pairs: &'a [(String, String)], keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        pairs
            .iter()
            .find(|(name, value)| name == key && !value.is_empty())
            .map(|(_, value)| value.as_str())
    })
}

fn pairs_to_input(pairs: impl IntoIterator<Item = (String, String)>) -> ActionInput {
    pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Request input: JSON object body, form body, or the query string minus
/// routing keys.
fn parse_input(
    headers: &HeaderMap,
    body: &[u8],
    query: Vec<(String, String)>,
) -> Result<ActionInput, ApiError> {
    let content_type = content_type(headers);

    if content_type.contains("application/json") {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ActionInput::new());
        }
        return match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ApiError::BadRequest(
                "Invalid JSON body: expected an object".to_string(),
            )),
            Err(err) => Err(ApiError::BadRequest(format!("Invalid JSON body: {err}"))),
        };
    }

    if !body.is_empty() {
        return Ok(pairs_to_input(
            url::form_urlencoded::parse(body).into_owned(),
        ));
    }

    Ok(pairs_to_input(query.into_iter().filter(|(key, _)| {
        !RESOURCE_KEYS.contains(&key.as_str()) && !ACTION_KEYS.contains(&key.as_str())
    })))
}

pub async fn gateway(
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    ClientIp(ip): ClientIp,
    Extension(state): Extension<Arc<AuthState>>,
    Extension(registry): Extension<Arc<Registry>>,
    body: Bytes,
) -> Response {
    let debug_errors = state.config().debug();
    match dispatch(
        &method,
        &headers,
        query.as_deref(),
        ip.as_deref(),
        &state,
        &registry,
        &body,
    )
    .await
    {
        Ok(response) => response,
        Err(err) => err.into_response_with(debug_errors),
    }
}

async fn dispatch(
    method: &Method,
    headers: &HeaderMap,
    query: Option<&str>,
    ip: Option<&str>,
    state: &AuthState,
    registry: &Registry,
    body: &[u8],
) -> Result<Response, ApiError> {
    let app = state.app();
    let ip_label = ip.unwrap_or("unknown");
    let sessions = state.sessions();

    let mut session = sessions.start(headers, ip).await?;
    if !session.is_logged_in() {
        return Err(ApiError::Unauthorized);
    }

    let pairs = query_pairs(query);
    let resource_name = routing_value(&pairs, &RESOURCE_KEYS).map(ToString::to_string);
    let action_name = routing_value(&pairs, &ACTION_KEYS).map(ToString::to_string);
    let input = parse_input(headers, body, pairs);

    if is_state_changing(method) {
        let field = input
            .as_ref()
            .ok()
            .and_then(|input| input.get(csrf::CSRF_FIELD))
            .and_then(Value::as_str);
        let presented = csrf::presented_token(headers, field);
        if !csrf::verify(
            &session,
            presented,
            state.config().csrf_token_expiry_seconds(),
        ) {
            warn!(
                ip = ip_label,
                resource = resource_name.as_deref().unwrap_or(""),
                action = action_name.as_deref().unwrap_or(""),
                "{app} gateway rejected: invalid CSRF token"
            );
            return Err(ApiError::Forbidden("Invalid CSRF token".to_string()));
        }
    }

    let (Some(resource_name), Some(action_name)) = (resource_name, action_name) else {
        return Err(ApiError::BadRequest(
            "Missing resource or action parameter".to_string(),
        ));
    };

    let resource = registry
        .get(&resource_name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown resource: {resource_name}")))?;

    let principal = session.principal().ok_or(ApiError::Unauthorized)?;
    if !principal.role.satisfies(resource.auth_role()) {
        warn!(
            user_id = principal.user_id,
            role = %principal.role,
            required = %resource.auth_role(),
            resource = %resource_name,
            action = %action_name,
            "{app} gateway rejected: insufficient role"
        );
        return Err(ApiError::Forbidden(
            "Forbidden: insufficient permissions".to_string(),
        ));
    }

    let handler = resource.action(&action_name).ok_or_else(|| {
        ApiError::NotFound(format!(
            "Unknown action '{action_name}' for resource '{resource_name}'"
        ))
    })?;

    let mut input = input?;
    input.remove(csrf::CSRF_FIELD);

    debug!(resource = %resource_name, action = %action_name, "{app} gateway dispatch");
    let result = {
        let mut ctx = ActionContext {
            state,
            method,
            session: &mut session,
            client_ip: ip,
        };
        handler.call(&mut ctx, input).await
    };

    if let Err(err) = sessions.save(&session).await {
        error!("Failed to save session: {err}");
    }

    match result {
        Ok(reply) => Ok(reply.into_response()),
        Err(ApiError::Internal(err)) => {
            error!(
                resource = %resource_name,
                action = %action_name,
                "{app} gateway handler failed: {err:#}"
            );
            Err(ApiError::Internal(err))
        }
        Err(err) => Err(err),
    }
}
