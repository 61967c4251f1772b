//!
//! sentry portal server binary
//! ---------------------------
//! Command-line entry point for the portal HTTP server. Settings come from
//! `SENTRY_*` environment variables, overridden by CLI flags.

use anyhow::Result;
use std::env;

use sentry_portal::config::{has_flag, PortalConfig, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    println!(r"                    __
   ________  ____  / /________  __
  / ___/ _ \/ __ \/ __/ ___/ / / /
 (__  )  __/ / / / /_/ /  / /_/ /
/____/\___/_/ /_/\__/_/   \__, /
                         /____/  ");

    // RUST_LOG wins; otherwise info for everything
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let config = PortalConfig::from_env_and_args(&args)?;
    let storage = match &config.data_root {
        Some(p) => p.display().to_string(),
        None => "memory".to_string(),
    };
    println!("sentry portal starting: http={}, data={}", config.http_port, storage);
    tracing::info!(
        http_port = config.http_port,
        data = %storage,
        predict_delay_ms = ?(config.predict_delay_min_ms, config.predict_delay_max_ms),
        "starting"
    );
    sentry_portal::server::run(config).await
}
