//! Registry-driven API gateway.
//!
//! Requests name a `(resource, action)` pair; the dispatcher checks the
//! session, CSRF token and role, then calls the registered handler and wraps
//! its output in the JSON envelope from `response`.

pub mod actions;
pub mod dispatch;
pub mod registry;
pub mod response;

pub use registry::{ActionContext, ActionHandler, ActionInput, Registry};
pub use response::{ApiError, Reply};
