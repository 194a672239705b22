use async_trait::async_trait;
use axum::http::Method;
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};

use super::response::{ApiError, Reply};
use crate::{
    api::{
        app::App,
        handlers::auth::{
            AuthState, csrf,
            principal::{Principal, Role},
        },
    },
    session::Session,
};

/// Request input handed to an action: JSON object, form fields or query string.
pub type ActionInput = Map<String, Value>;

/// Everything an action may touch for the current request.
pub struct ActionContext<'a> {
    pub state: &'a AuthState,
    pub method: &'a Method,
    pub session: &'a mut Session,
    pub client_ip: Option<&'a str>,
}

impl ActionContext<'_> {
    #[must_use]
    pub fn app(&self) -> App {
        self.state.app()
    }

    /// # Errors
    /// Returns `ApiError::Unauthorized` for anonymous sessions.
    pub fn principal(&self) -> Result<&Principal, ApiError> {
        self.session.principal().ok_or(ApiError::Unauthorized)
    }

    /// Actions that change state must not run on GET, which skips the CSRF check.
    ///
    /// # Errors
    /// Returns `405` for safe methods.
    pub fn require_state_changing(&self) -> Result<(), ApiError> {
        if super::dispatch::is_state_changing(self.method) {
            Ok(())
        } else {
            Err(ApiError::Status {
                code: 405,
                message: format!("Method {} not allowed for this action", self.method),
            })
        }
    }

    /// # Errors
    /// Returns an error if a new token cannot be generated.
    pub fn csrf_token(&mut self) -> Result<String, ApiError> {
        let expiry = self.state.config().csrf_token_expiry_seconds();
        Ok(csrf::issue(self.session, expiry)?)
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, ctx: &mut ActionContext<'_>, input: ActionInput) -> Result<Reply, ApiError>;
}

/// A resource: the role it requires and its named actions.
pub struct Resource {
    auth_role: Role,
    actions: HashMap<String, Arc<dyn ActionHandler>>,
}

impl Resource {
    #[must_use]
    pub fn auth_role(&self) -> &Role {
        &self.auth_role
    }

    #[must_use]
    pub fn action(&self, name: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.actions.get(name)
    }
}

/// `resource -> { auth_role, actions }`
#[derive(Default)]
pub struct Registry {
    resources: HashMap<String, Resource>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a resource; `done` registers it.
    #[must_use]
    pub fn resource(self, name: &str, auth_role: Role) -> ResourceBuilder {
        ResourceBuilder {
            registry: self,
            name: name.to_string(),
            resource: Resource {
                auth_role,
                actions: HashMap::new(),
            },
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }
}

pub struct ResourceBuilder {
    registry: Registry,
    name: String,
    resource: Resource,
}

impl ResourceBuilder {
    #[must_use]
    pub fn action(mut self, name: &str, handler: impl ActionHandler + 'static) -> Self {
        self.resource
            .actions
            .insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Finish the resource and return the registry.
    #[must_use]
    pub fn done(mut self) -> Registry {
        self.registry.resources.insert(self.name, self.resource);
        self.registry
    }
}
