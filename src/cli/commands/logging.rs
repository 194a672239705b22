use clap::{Arg, ArgMatches, Command, builder::ValueParser};
use std::path::PathBuf;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_PATH: &str = "log-path";
pub const ARG_LOG_RETENTION_DAYS: &str = "log-retention-days";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" | "critical" => Ok(0),
            "warn" | "warning" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARNING, INFO, DEBUG, TRACE (default: WARNING)")
                .env("LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_PATH)
                .long("log-path")
                .help("Directory for daily JSON log files (console only when unset)")
                .env("LOG_PATH")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_LOG_RETENTION_DAYS)
                .long("log-retention-days")
                .help("Delete log files older than this many days")
                .env("LOG_RETENTION_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(u32)),
        )
}

/// Where and how long to keep log files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileOptions {
    pub dir: PathBuf,
    pub retention_days: u32,
}

impl FileOptions {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Option<Self> {
        let dir = matches
            .get_one::<PathBuf>(ARG_LOG_PATH)
            .filter(|dir| !dir.as_os_str().is_empty())?
            .clone();
        Some(Self {
            dir,
            retention_days: matches
                .get_one::<u32>(ARG_LOG_RETENTION_DAYS)
                .copied()
                .unwrap_or(30),
        })
    }
}
