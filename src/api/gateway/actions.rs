//! Built-in gateway resources shared by both apps.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use super::{
    registry::{ActionContext, ActionHandler, ActionInput, Registry},
    response::{ApiError, Reply},
};
use crate::api::{
    app::App,
    handlers::{auth::principal::Role, daily_reset},
};

const DEFAULT_ATTEMPTS_LIMIT: i64 = 50;
const MAX_ATTEMPTS_LIMIT: i64 = 200;

/// Registry with the built-in resources for `app`.
#[must_use]
pub fn registry(app: App) -> Registry {
    let registry = Registry::new()
        .resource("session", Role::Staff)
        .action("whoami", WhoAmI)
        .action("csrf", CsrfToken)
        .done()
        .resource("security", Role::Manager)
        .action("attempts", RecentAttempts)
        .action("unlock", Unlock)
        .done();

    if app.resets_daily_availability() {
        registry
            .resource("availability", Role::Manager)
            .action("reset", AvailabilityReset)
            .done()
    } else {
        registry
    }
}

fn input_str<'a>(input: &'a ActionInput, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// `limit` as a JSON number or numeric string, clamped to `1..=MAX_ATTEMPTS_LIMIT`.
fn limit(input: &ActionInput) -> Result<i64, ApiError> {
    let limit = match input.get("limit") {
        None | Some(Value::Null) => return Ok(DEFAULT_ATTEMPTS_LIMIT),
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) if text.trim().is_empty() => {
            return Ok(DEFAULT_ATTEMPTS_LIMIT);
        }
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        Some(_) => None,
    }
    .ok_or_else(|| ApiError::BadRequest("limit must be an integer".to_string()))?;

    Ok(limit.clamp(1, MAX_ATTEMPTS_LIMIT))
}

struct WhoAmI;

#[async_trait]
impl ActionHandler for WhoAmI {
    async fn call(&self, ctx: &mut ActionContext<'_>, _input: ActionInput) -> Result<Reply, ApiError> {
        let principal = ctx.principal()?;
        let data = serde_json::to_value(principal).map_err(anyhow::Error::from)?;
        Ok(Reply::new(data))
    }
}

struct CsrfToken;

#[async_trait]
impl ActionHandler for CsrfToken {
    async fn call(&self, ctx: &mut ActionContext<'_>, _input: ActionInput) -> Result<Reply, ApiError> {
        let token = ctx.csrf_token()?;
        Ok(Reply::new(json!({ "csrf_token": token })))
    }
}

struct RecentAttempts;

#[async_trait]
impl ActionHandler for RecentAttempts {
    async fn call(&self, ctx: &mut ActionContext<'_>, input: ActionInput) -> Result<Reply, ApiError> {
        let limit = limit(&input)?;
        let attempts = ctx
            .state
            .rate_limiter()
            .recent(input_str(&input, "username"), limit)
            .await?;
        let data = serde_json::to_value(&attempts).map_err(anyhow::Error::from)?;
        Ok(Reply::new(data))
    }
}

struct Unlock;

#[async_trait]
impl ActionHandler for Unlock {
    async fn call(&self, ctx: &mut ActionContext<'_>, input: ActionInput) -> Result<Reply, ApiError> {
        ctx.require_state_changing()?;
        let username = input_str(&input, "username")
            .ok_or_else(|| ApiError::BadRequest("username is required".to_string()))?;

        let cleared = ctx.state.rate_limiter().unlock(username).await?;
        let manager = ctx.principal()?;
        info!(
            manager_id = manager.user_id,
            username,
            cleared,
            "{} login lockout lifted",
            ctx.app()
        );
        Ok(Reply::new(json!({ "username": username, "cleared": cleared }))
            .with_message("Login attempts cleared"))
    }
}

struct AvailabilityReset;

#[async_trait]
impl ActionHandler for AvailabilityReset {
    async fn call(&self, ctx: &mut ActionContext<'_>, _input: ActionInput) -> Result<Reply, ApiError> {
        ctx.require_state_changing()?;
        let principal = ctx.principal()?;
        let accounts = ctx.state.accounts();

        let store = accounts
            .find_store(&principal.store_code)
            .await?
            .ok_or_else(|| ApiError::NotFound("Store not found or inactive".to_string()))?;

        let outcome = daily_reset::run(
            accounts,
            store.id,
            ctx.state.config().business_timezone(),
            store.eod_cutoff_hour,
            Utc::now(),
            true,
        )
        .await?;

        let data = match outcome {
            daily_reset::DailyReset::Applied {
                business_date,
                cleared,
            } => json!({ "business_date": business_date, "cleared": cleared }),
            daily_reset::DailyReset::AlreadyDone { business_date } => {
                json!({ "business_date": business_date, "cleared": 0 })
            }
        };
        Ok(Reply::new(data).with_message("Availability reset"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: Value) -> ActionInput {
        match value {
            Value::Object(map) => map,
            _ => ActionInput::new(),
        }
    }

    #[test]
    fn availability_is_pos_only() {
        assert!(registry(App::Pos).get("availability").is_some());
        assert!(registry(App::Kds).get("availability").is_none());
        for app in App::ALL {
            let registry = registry(app);
            assert!(registry.get("session").is_some_and(|r| r.auth_role() == &Role::Staff));
            assert!(registry.get("security").is_some_and(|r| r.auth_role() == &Role::Manager));
        }
    }

    #[test]
    fn limit_defaults_and_clamps() -> Result<(), ApiError> {
        assert_eq!(limit(&input(json!({})))?, DEFAULT_ATTEMPTS_LIMIT);
        assert_eq!(limit(&input(json!({ "limit": "" })))?, DEFAULT_ATTEMPTS_LIMIT);
        assert_eq!(limit(&input(json!({ "limit": "10" })))?, 10);
        assert_eq!(limit(&input(json!({ "limit": 1000 })))?, MAX_ATTEMPTS_LIMIT);
        assert_eq!(limit(&input(json!({ "limit": -3 })))?, 1);
        assert!(limit(&input(json!({ "limit": "many" }))).is_err());
        Ok(())
    }

    #[test]
    fn blank_strings_are_missing() {
        let input = input(json!({ "username": "  ", "other": "x" }));
        assert_eq!(input_str(&input, "username"), None);
        assert_eq!(input_str(&input, "other"), Some("x"));
    }
}
