use crate::config::DatabaseParts;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("db-host")
                .long("db-host")
                .help("Database host, used when no DSN is given")
                .env("DB_HOST")
                .default_value("localhost"),
        )
        .arg(
            Arg::new("db-name")
                .long("db-name")
                .help("Database name, used when no DSN is given")
                .env("DB_NAME"),
        )
        .arg(
            Arg::new("db-user")
                .long("db-user")
                .help("Database user, used when no DSN is given")
                .env("DB_USER"),
        )
        .arg(
            Arg::new("db-pass")
                .long("db-pass")
                .help("Database password, used when no DSN is given")
                .env("DB_PASS")
                .hide_env_values(true),
        )
}

#[must_use]
pub fn parse(matches: &ArgMatches) -> DatabaseParts {
    DatabaseParts {
        host: matches
            .get_one::<String>("db-host")
            .cloned()
            .unwrap_or_else(|| "localhost".to_string()),
        name: matches.get_one::<String>("db-name").cloned(),
        user: matches.get_one::<String>("db-user").cloned(),
        password: SecretString::from(
            matches
                .get_one::<String>("db-pass")
                .cloned()
                .unwrap_or_default(),
        ),
    }
}
