//! End-to-end gateway checks: login through the form endpoint, then call
//! `/{app}/api/gateway` with the resulting session.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use toptea::api::{
    self, App,
    handlers::auth::{
        AccountStore, AttemptLedger, AuthConfig, MemoryStore,
        storage::{AttemptRecord, AttemptScope, NewAttempt},
    },
};
use tower::ServiceExt;

const STORE_CODE: &str = "VLC01";

struct Client {
    router: Router,
    app: App,
    cookie: String,
    csrf: String,
}

struct Shop {
    router: Router,
    store: Arc<MemoryStore>,
    store_id: i64,
}

/// Ledger that records and counts attempts but cannot list them.
struct HistoryUnavailable(Arc<MemoryStore>);

#[async_trait]
impl AttemptLedger for HistoryUnavailable {
    async fn count_failures(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        self.0.count_failures(username, ip, scope, since).await
    }

    async fn record_attempt(&self, attempt: NewAttempt<'_>) -> Result<()> {
        self.0.record_attempt(attempt).await
    }

    async fn clear_attempts(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        failures_only: bool,
    ) -> Result<u64> {
        self.0
            .clear_attempts(username, ip, scope, failures_only)
            .await
    }

    async fn clear_user_failures(&self, username: &str) -> Result<u64> {
        self.0.clear_user_failures(username).await
    }

    async fn recent_attempts(
        &self,
        _username: Option<&str>,
        _limit: i64,
    ) -> Result<Vec<AttemptRecord>> {
        bail!("attempt history unavailable")
    }
}

impl Shop {
    async fn new() -> Self {
        Self::build(AuthConfig::default(), false).await
    }

    /// `broken_history` swaps in a ledger whose listing always fails.
    async fn build(config: AuthConfig, broken_history: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let store_id = store.add_store(STORE_CODE, "Valencia Centro").await;
        store
            .add_user(store_id, "maria", "staff-pass", "Maria Lopez", "staff")
            .await;
        store
            .add_user(store_id, "jefe", "manager-pass", "Ana Jefe", "manager")
            .await;

        let accounts: Arc<dyn AccountStore> = store.clone();
        let ledger: Arc<dyn AttemptLedger> = if broken_history {
            Arc::new(HistoryUnavailable(store.clone()))
        } else {
            store.clone()
        };
        let config = config.with_login_max_attempts(2);
        let router = api::router(api::app_states(&config, &accounts, &ledger), accounts);

        Self {
            router,
            store,
            store_id,
        }
    }

    async fn csrf(&self, app: App, cookie: Option<&str>) -> Result<(String, String)> {
        let mut request = Request::builder().uri(format!("/{}/api/csrf", app.name()));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        let response = self
            .router
            .clone()
            .oneshot(request.body(Body::empty())?)
            .await?;
        let cookie = set_cookie(&response).context("csrf response sets no cookie")?;
        let body = json_body(response).await?;
        let token = body["data"]["csrf_token"]
            .as_str()
            .ok_or_else(|| anyhow!("missing csrf_token in {body}"))?
            .to_string();
        Ok((cookie, token))
    }

    /// Post the login form and return the redirect response.
    async fn post_login(&self, app: App, username: &str, password: &str) -> Result<Response> {
        let (cookie, token) = self.csrf(app, None).await?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("csrf_token", &token)
            .append_pair("store_code", STORE_CODE)
            .append_pair("username", username)
            .append_pair("password", password)
            .finish();
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/{}/api/login", app.name()))
            .header(COOKIE, cookie)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))?;
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn login(&self, app: App, username: &str, password: &str) -> Result<Client> {
        let response = self.post_login(app, username, password).await?;
        let location = header(&response, LOCATION);
        if location != app.home_page() {
            return Err(anyhow!("login as {username} redirected to {location}"));
        }
        let cookie = set_cookie(&response).context("login sets no cookie")?;
        let (cookie, csrf) = self.csrf(app, Some(&cookie)).await?;
        Ok(Client {
            router: self.router.clone(),
            app,
            cookie,
            csrf,
        })
    }
}

impl Client {
    fn request(&self, method: Method, query: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(format!("/{}/api/gateway?{query}", self.app.name()))
            .header(COOKIE, &self.cookie)
    }

    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        assert_eq!(header(&response, CACHE_CONTROL), "no-store");
        Ok((status, json_body(response).await?))
    }

    async fn get(&self, query: &str) -> Result<(StatusCode, Value)> {
        self.send(self.request(Method::GET, query).body(Body::empty())?)
            .await
    }

    async fn post_json(&self, query: &str, body: &Value) -> Result<(StatusCode, Value)> {
        let request = self
            .request(Method::POST, query)
            .header(CONTENT_TYPE, "application/json")
            .header("x-csrf-token", &self.csrf)
            .body(Body::from(serde_json::to_vec(body)?))?;
        self.send(request).await
    }
}

fn header<'a>(response: &'a Response, name: axum::http::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn set_cookie(response: &Response) -> Option<String> {
    header(response, SET_COOKIE)
        .split(';')
        .next()
        .filter(|cookie| !cookie.is_empty())
        .map(ToString::to_string)
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn anonymous_calls_are_unauthorized() -> Result<()> {
    let shop = Shop::new().await;
    let request = Request::builder()
        .uri("/kds/api/gateway?res=session&act=whoami")
        .body(Body::empty())?;
    let response = shop.router.clone().oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(SET_COOKIE).is_none());
    let body = json_body(response).await?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Unauthorized: please log in");
    Ok(())
}

#[tokio::test]
async fn staff_can_read_their_session() -> Result<()> {
    let shop = Shop::new().await;
    let client = shop.login(App::Kds, "maria", "staff-pass").await?;

    let (status, body) = client.get("res=session&act=whoami").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["username"], "maria");
    assert_eq!(body["data"]["store_id"], shop.store_id);

    let (status, body) = client.get("resource=session&action=csrf").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["csrf_token"], client.csrf.as_str());
    Ok(())
}

#[tokio::test]
async fn checks_run_in_order() -> Result<()> {
    let shop = Shop::new().await;
    let client = shop.login(App::Kds, "maria", "staff-pass").await?;

    // CSRF is checked before routing parameters.
    let request = client.request(Method::POST, "").body(Body::empty())?;
    let (status, _) = client.send(request).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = client.post_json("", &json!({})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing resource or action parameter");

    let (status, _) = client.get("res=stock&act=list").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Role is checked before the action exists.
    let (status, _) = client.get("res=security&act=nothing").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = client.get("res=session&act=nothing").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = client
        .request(Method::POST, "res=session&act=whoami")
        .header(CONTENT_TYPE, "application/json")
        .header("x-csrf-token", &client.csrf)
        .body(Body::from("{not json"))?;
    let (status, _) = client.send(request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn csrf_token_can_travel_in_the_body() -> Result<()> {
    let shop = Shop::new().await;
    let client = shop.login(App::Kds, "maria", "staff-pass").await?;

    let body = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("csrf_token", &client.csrf)
        .finish();
    let request = client
        .request(Method::POST, "res=session&act=whoami")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))?;
    let (status, _) = client.send(request).await?;
    assert_eq!(status, StatusCode::OK);

    let request = client
        .request(Method::POST, "res=session&act=whoami")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("csrf_token=stale"))?;
    let (status, _) = client.send(request).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn manager_can_inspect_and_unlock_attempts() -> Result<()> {
    let shop = Shop::new().await;

    for _ in 0..2 {
        let response = shop.post_login(App::Kds, "maria", "wrong").await?;
        assert_eq!(
            header(&response, LOCATION),
            "/kds/login?error=invalid_credentials"
        );
    }
    let response = shop.post_login(App::Kds, "maria", "staff-pass").await?;
    assert_eq!(header(&response, LOCATION), "/kds/login?error=rate_limit");

    let manager = shop.login(App::Kds, "jefe", "manager-pass").await?;

    let (status, body) = manager
        .get("res=security&act=attempts&username=maria&limit=10")
        .await?;
    assert_eq!(status, StatusCode::OK);
    let attempts = body["data"].as_array().context("attempts is not a list")?;
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|attempt| attempt["success"] == false));

    // Unlock changes state, so GET is refused.
    let (status, _) = manager.get("res=security&act=unlock&username=maria").await?;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, body) = manager
        .post_json("res=security&act=unlock", &json!({}))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "username is required");

    let (status, body) = manager
        .post_json("res=security&act=unlock", &json!({ "username": "maria" }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cleared"], 2);

    shop.login(App::Kds, "maria", "staff-pass").await?;
    Ok(())
}

#[tokio::test]
async fn availability_reset_is_pos_only_and_manager_only() -> Result<()> {
    let shop = Shop::new().await;

    let kds_manager = shop.login(App::Kds, "jefe", "manager-pass").await?;
    let (status, _) = kds_manager
        .post_json("res=availability&act=reset", &json!({}))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let staff = shop.login(App::Pos, "maria", "staff-pass").await?;
    let (status, _) = staff
        .post_json("res=availability&act=reset", &json!({}))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let manager = shop.login(App::Pos, "jefe", "manager-pass").await?;
    // The login already ran today's reset; a forced one clears new flags.
    shop.store.set_sold_out(shop.store_id, 3).await;
    let (status, body) = manager
        .post_json("res=availability&act=reset", &json!({}))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cleared"], 3);
    assert_eq!(shop.store.sold_out(shop.store_id).await, 0);
    Ok(())
}

#[tokio::test]
async fn handler_failures_hide_details_unless_debug() -> Result<()> {
    let shop = Shop::build(AuthConfig::default(), true).await;
    let manager = shop.login(App::Kds, "jefe", "manager-pass").await?;
    let (status, body) = manager.get("res=security&act=attempts").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Internal server error");

    let shop = Shop::build(AuthConfig::default().with_debug(true), true).await;
    let manager = shop.login(App::Kds, "jefe", "manager-pass").await?;
    let (status, body) = manager.get("res=security&act=attempts").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "attempt history unavailable");
    Ok(())
}
