//! `/health`: build metadata plus a database check.

use crate::{GIT_COMMIT_HASH, api::handlers::auth::storage::AccountStore};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error};

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

async fn database_healthy(accounts: &dyn AccountStore) -> bool {
    match timeout(
        Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS),
        accounts.ping(),
    )
    .await
    {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Failed to ping database: {err:#}");
            false
        }
        Err(_) => {
            error!("Database ping timed out after {HEALTH_DB_TIMEOUT_SECONDS}s");
            false
        }
    }
}

fn x_app_header(health: &Health) -> HeaderMap {
    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|value| {
            debug!("X-App header: {:?}", value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new())
}

/// `GET` returns the JSON payload, other methods only the status and `X-App`.
pub async fn health(
    method: Method,
    Extension(accounts): Extension<Arc<dyn AccountStore>>,
) -> impl IntoResponse {
    let db_healthy = database_healthy(accounts.as_ref()).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_healthy { "ok" } else { "error" }.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };
    let headers = x_app_header(&health);

    if db_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}
