use crate::{
    cli::{
        actions::Action,
        commands::{self, ARG_ENV_FILE, logging},
        dispatch, telemetry,
    },
    config::env_file,
};
use anyhow::Result;
use clap::{ArgMatches, parser::ValueSource};
use std::path::PathBuf;
use tracing::{Level, debug};

/// Map the verbosity value (count or level name) to a tracing level.
const fn get_verbosity_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Neither `-v` nor `LOG_LEVEL` given: warnings and up.
fn verbosity_level(matches: &ArgMatches) -> Level {
    match matches.value_source(logging::ARG_VERBOSITY) {
        None | Some(ValueSource::DefaultValue) => Level::WARN,
        Some(_) => get_verbosity_level(
            matches
                .get_one::<u8>(logging::ARG_VERBOSITY)
                .copied()
                .unwrap_or(1),
        ),
    }
}

/// Load the environment file named by the matches. Only an explicitly chosen
/// file has to exist.
fn load_env_file(matches: &ArgMatches) -> Result<Option<PathBuf>> {
    let Some(path) = matches.get_one::<PathBuf>(ARG_ENV_FILE) else {
        return Ok(None);
    };
    let required = !matches!(
        matches.value_source(ARG_ENV_FILE),
        None | Some(ValueSource::DefaultValue)
    );
    Ok(env_file::load(path, required)?.then(|| path.clone()))
}

/// Main entry point for the CLI - builds and returns the Action
///
/// # Errors
///
/// Returns an error if argument parsing, telemetry initialization, or action dispatch fails
pub fn start() -> Result<Action> {
    // 1. Parse once to find the environment file
    let matches = commands::new().get_matches();

    // 2. Load it and parse again so `.env(...)` fallbacks see its values
    let env_file = load_env_file(&matches)?;
    let matches = if env_file.is_some() {
        commands::new().get_matches()
    } else {
        matches
    };

    // 3. Initialize telemetry
    telemetry::init(
        verbosity_level(&matches),
        logging::FileOptions::parse(&matches).as_ref(),
    )?;
    if let Some(path) = &env_file {
        debug!("Loaded environment file {}", path.display());
    }

    // 4. Dispatch to the action
    dispatch::handler(&matches)
}
