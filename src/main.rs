use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use driver_rewards::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("invalid server configuration")?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "driver_rewards",
        "driver_rewards starting: RUST_LOG='{}', tier={:?}, port={}, hostname={}, session_ttl={}s",
        rust_log,
        config.tier,
        config.port,
        config.hostname().unwrap_or("<local>"),
        driver_rewards::identity::SESSION_TTL_SECS
    );

    let seed = match (std::env::var("ADMIN_EMAIL"), std::env::var("ADMIN_PASSWORD")) {
        (Ok(email), Ok(password)) if !email.is_empty() && !password.is_empty() => Some((email, password)),
        _ => None,
    };

    driver_rewards::server::run(config, seed).await
}
