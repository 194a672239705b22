//! Map validated CLI matches to an action.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, database};
use crate::config::resolve_dsn;
use anyhow::Result;

/// # Errors
/// Returns an error if the database settings are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = resolve_dsn(
        matches.get_one::<String>("dsn").map(String::as_str),
        &database::parse(matches),
    )?;

    Ok(Action::Server(Args {
        port,
        dsn,
        auth_config: auth::parse(matches),
    }))
}
