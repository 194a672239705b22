use crate::{api::handlers::auth::AuthConfig, config::AppEnv};
use chrono_tz::Tz;
use clap::{Arg, ArgAction, ArgMatches, Command, builder::BoolishValueParser};
use std::path::PathBuf;

pub fn with_args(command: Command) -> Command {
    let command = with_app_args(command);
    let command = with_session_args(command);
    with_login_args(command)
}

fn with_app_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("app-env")
                .long("app-env")
                .help("Deployment environment: production or development")
                .env("APP_ENV")
                .default_value("production"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Expose internal error details in API responses")
                .env("APP_DEBUG")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new("timezone")
                .long("timezone")
                .help("IANA time zone of the stores, used for business days")
                .env("APP_TIMEZONE")
                .default_value("Europe/Madrid")
                .value_parser(parse_timezone),
        )
        .arg(
            Arg::new("trust-proxy-headers")
                .long("trust-proxy-headers")
                .help("Take the client IP from X-Forwarded-For / X-Real-IP (only behind a trusted proxy)")
                .env("TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new("images-dir")
                .long("images-dir")
                .help("Directory served by /{app}/api/image")
                .env("IMAGES_DIR")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("session-lifetime")
                .long("session-lifetime")
                .help("Session lifetime in seconds (default: KDS 3600, POS 7200)")
                .env("SESSION_LIFETIME")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("session-cookie-secure")
                .long("session-cookie-secure")
                .help("Mark the session cookie Secure (production only)")
                .env("SESSION_COOKIE_SECURE")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new("session-bind-ip")
                .long("session-bind-ip")
                .help("Destroy the session when the client IP changes")
                .env("SESSION_BIND_IP")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new("csrf-token-expiry")
                .long("csrf-token-expiry")
                .help("CSRF token lifetime in seconds")
                .env("CSRF_TOKEN_EXPIRY")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_login_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("login-max-attempts")
                .long("login-max-attempts")
                .help("Failed logins allowed inside the lockout window")
                .env("LOGIN_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("login-lockout-minutes")
                .long("login-lockout-minutes")
                .help("Rolling window for counting failed logins, in minutes")
                .env("LOGIN_LOCKOUT_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn parse_timezone(value: &str) -> Result<Tz, String> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|err| format!("unknown time zone '{value}': {err}"))
}

#[must_use]
pub fn parse(matches: &ArgMatches) -> AuthConfig {
    let app_env = matches
        .get_one::<String>("app-env")
        .map_or(AppEnv::Production, |value| AppEnv::parse(value));

    let mut config = AuthConfig::new(app_env)
        .with_debug(matches.get_flag("debug"))
        .with_session_lifetime_seconds(matches.get_one::<i64>("session-lifetime").copied())
        .with_session_cookie_secure(matches.get_flag("session-cookie-secure"))
        .with_session_bind_ip(matches.get_flag("session-bind-ip"))
        .with_trust_proxy_headers(matches.get_flag("trust-proxy-headers"))
        .with_images_dir(matches.get_one::<PathBuf>("images-dir").cloned());

    if let Some(seconds) = matches.get_one::<i64>("csrf-token-expiry") {
        config = config.with_csrf_token_expiry_seconds(*seconds);
    }
    if let Some(attempts) = matches.get_one::<i64>("login-max-attempts") {
        config = config.with_login_max_attempts(*attempts);
    }
    if let Some(minutes) = matches.get_one::<i64>("login-lockout-minutes") {
        config = config.with_login_lockout_minutes(*minutes);
    }
    if let Some(timezone) = matches.get_one::<Tz>("timezone") {
        config = config.with_business_timezone(*timezone);
    }
    config
}
