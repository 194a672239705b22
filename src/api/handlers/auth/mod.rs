//! Session authentication for the KDS and POS.
//!
//! Login is a classic form post: the browser fetches a CSRF token from
//! `/{app}/api/csrf`, posts credentials to `/{app}/api/login` and follows the
//! `303` redirect. The session cookie is per app (`KDS_SESSION`,
//! `POS_SESSION`) and the principal lives in the server-side session record.
//!
//! ## Login Rate Limiting
//!
//! Failed attempts are written to `login_attempts` and counted inside a
//! rolling window (`LOGIN_LOCKOUT_MINUTES`, default 15).
//!
//! - **KDS:** a username or a client address on its own can be locked out.
//! - **POS:** only the username and address pair is locked out; a successful
//!   login clears the pair's failures and keeps earlier successes.
//!
//! Ledger errors never block a login.

pub(crate) mod csrf;
pub(crate) mod login;
pub mod memory;
pub mod principal;
pub(crate) mod rate_limit;
pub(crate) mod session;
mod state;
pub mod storage;
pub(crate) mod types;
pub(crate) mod utils;

pub use memory::MemoryStore;
pub use principal::{Principal, Role};
pub use state::{AuthConfig, AuthState};
pub use storage::{AccountStore, AttemptLedger, PgStore};
