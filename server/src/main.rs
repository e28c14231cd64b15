//! Daytrack Server - Main entry point.
//!
//! This binary starts the checklist webhook server with:
//! - Structured JSON logging for production
//! - Webhook registration when a public hostname is configured
//! - Graceful shutdown handling (SIGTERM/SIGINT) with a bounded drain
//! - Background rate limiter cleanup
//!
//! # Configuration
//!
//! See [`daytrack_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! TELEGRAM_TOKEN="123456:ABC" \
//! TELEGRAM_CHAT_ID="-1001234567890" \
//! RAILWAY_PUBLIC_DOMAIN="daytrack.up.railway.app" \
//! PORT=8080 \
//! cargo run --release --bin daytrack-server
//! ```

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use daytrack_server::config::Config;
use daytrack_server::origin::OriginAllowlist;
use daytrack_server::rate_limit::RateLimiter;
use daytrack_server::routes::{create_router, AppState};
use daytrack_server::shutdown::{serve, shutdown_signal, DEFAULT_DRAIN_TIMEOUT};
use daytrack_server::state::ChecklistStore;
use daytrack_server::telegram::TelegramClient;

/// Cleanup interval for stale rate limiter entries (30 seconds).
const RATE_LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    init_logging();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  TELEGRAM_TOKEN         - Bot token");
            eprintln!("  TELEGRAM_CHAT_ID       - Chat the schedule is posted to");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  RAILWAY_PUBLIC_DOMAIN  - Public hostname, enables webhook registration");
            eprintln!("  PORT                   - HTTP server port (default: 8080)");
            eprintln!("  TELEGRAM_API_URL       - Bot API base URL (default: https://api.telegram.org)");
            eprintln!("  RUST_LOG               - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "Server error");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let webhook_url = config.webhook_url();

    info!(
        port = config.port,
        chat_id = config.chat_id,
        webhook_registration = webhook_url.is_some(),
        "Daytrack server starting"
    );

    let telegram = TelegramClient::new(&config.api_base_url, &config.bot_token, config.chat_id)
        .context("failed to create Telegram client")?
        .with_shutdown(shutdown.clone());

    let state = AppState::with_components(
        config.clone(),
        ChecklistStore::default(),
        RateLimiter::default(),
        telegram.clone(),
        OriginAllowlist::telegram(),
    );

    // Spawn rate limiter cleanup task
    let cleanup_handle = state
        .rate_limiter
        .spawn_cleanup_task(RATE_LIMITER_CLEANUP_INTERVAL);
    info!(
        interval_secs = RATE_LIMITER_CLEANUP_INTERVAL.as_secs(),
        "Rate limiter cleanup task started"
    );

    let app = create_router(state);

    // Bind to address
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(address = %bind_addr, "Server listening");

    // Register the webhook once the listener is up
    match webhook_url {
        Some(url) => {
            tokio::spawn(async move {
                if telegram.set_webhook(&url).await.is_none() {
                    warn!(url = %url, "Webhook registration failed");
                }
            });
        }
        None => info!("RAILWAY_PUBLIC_DOMAIN not set, skipping webhook registration"),
    }

    tokio::spawn(shutdown_signal(shutdown.clone()));

    info!("Server ready to accept connections");
    let result = serve(listener, app, shutdown, DEFAULT_DRAIN_TIMEOUT).await;

    cleanup_handle.abort();
    info!("Rate limiter cleanup task stopped");

    result.context("server error")
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info,tower_http=debug`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}
