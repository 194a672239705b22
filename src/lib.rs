//! # TopTea (KDS & POS backend)
//!
//! `toptea` serves the authentication and API plumbing for two in-store
//! applications: the Kitchen Display System (`/kds`) and the Point of Sale
//! terminal (`/pos`).
//!
//! ## Sessions
//!
//! Sessions are server-side. The browser only holds an opaque random id in an
//! `HttpOnly`, `SameSite=Strict` cookie; the store is keyed by the SHA-256 of
//! that id. Client-chosen ids are never adopted, and the id is regenerated on
//! login.
//!
//! ## Login & Rate Limiting
//!
//! Logins are checked against a CSRF token held in the session, then against a
//! rolling window of failed attempts (5 failures in 15 minutes by default).
//! KDS counts failures per username *or* client IP, POS per username *and*
//! client IP.
//!
//! ## API Gateway
//!
//! Each application exposes a registry-driven gateway that maps
//! `(resource, action)` to a handler. Every call requires a session, every
//! state-changing call requires a valid CSRF token, and resources declare the
//! role they require (`manager` satisfies any role).

pub mod api;
pub mod cli;
pub mod config;
pub mod logging;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
