use crate::{
    api::{
        gateway::{actions, dispatch},
        handlers::{
            auth::{self, AccountStore, AttemptLedger, AuthConfig, AuthState},
            health, image,
        },
    },
    session::MemorySessionStore,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{any, get},
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub mod app;
pub mod gateway;
pub mod handlers;

pub use app::App;

/// One `AuthState` per app, each with its own in-memory session store.
#[must_use]
pub fn app_states(
    config: &AuthConfig,
    accounts: &Arc<dyn AccountStore>,
    ledger: &Arc<dyn AttemptLedger>,
) -> Vec<Arc<AuthState>> {
    App::ALL
        .into_iter()
        .map(|app| {
            Arc::new(AuthState::new(
                app,
                config.clone(),
                Arc::new(MemorySessionStore::new()),
                accounts.clone(),
                ledger.clone(),
            ))
        })
        .collect()
}

/// Routes for one app, mounted under `/{app}`.
fn app_router(state: Arc<AuthState>) -> Router {
    let registry = Arc::new(actions::registry(state.app()));

    Router::new()
        .route("/api/login", any(auth::login::login))
        .route("/api/csrf", get(auth::csrf::csrf))
        .route("/api/session", get(auth::session::session))
        .route("/api/image", get(image::image))
        .route(
            "/logout",
            get(auth::session::logout).post(auth::session::logout),
        )
        .route("/api/gateway", any(dispatch::gateway))
        .layer(Extension(registry))
        .layer(Extension(state))
}

/// Full application router: `/health` plus every app under its mount path.
#[must_use]
pub fn router(states: Vec<Arc<AuthState>>, accounts: Arc<dyn AccountStore>) -> Router {
    let router = states.into_iter().fold(Router::new(), |router, state| {
        let mount_path = state.app().mount_path();
        router.nest(&mount_path, app_router(state))
    });

    router
        .route("/health", get(health::health).options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(accounts)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: &SecretString, auth_config: AuthConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(auth::PgStore::new(pool));
    let accounts: Arc<dyn AccountStore> = store.clone();
    let ledger: Arc<dyn AttemptLedger> = store;

    let states = app_states(&auth_config, &accounts, &ledger);
    for state in &states {
        state.sessions().clone().spawn_purger();
    }

    let app = router(states, accounts);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
