use crate::{api, api::handlers::auth::AuthConfig, api::App, cli::telemetry};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub auth_config: AuthConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let result = api::new(args.port, &args.dsn, args.auth_config).await;
    telemetry::shutdown_tracer();
    result
}

fn log_startup_args(args: &Args) {
    let config = &args.auth_config;
    let mut entries = vec![
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(args.dsn.expose_secret())),
        ("app_env", format!("{:?}", config.app_env()).to_lowercase()),
        ("debug", config.debug().to_string()),
        ("cookie_secure", config.session_cookie_secure().to_string()),
        (
            "csrf_token_expiry",
            format!("{}s", config.csrf_token_expiry_seconds()),
        ),
        ("business_timezone", config.business_timezone().to_string()),
        (
            "trust_proxy_headers",
            config.trust_proxy_headers().to_string(),
        ),
        (
            "images_dir",
            config
                .images_dir()
                .map_or_else(|| "none".to_string(), |dir| dir.display().to_string()),
        ),
    ];
    for app in App::ALL {
        entries.push((
            app.name(),
            format!(
                "{} session {}s, cookie {}",
                app.mount_path(),
                config.session_lifetime_seconds(app),
                app.cookie_name()
            ),
        ));
    }

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
