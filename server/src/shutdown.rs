//! Graceful shutdown.
//!
//! A single [`CancellationToken`] represents "the process is stopping". It is
//! cancelled by SIGINT/SIGTERM (see [`shutdown_signal`]) and observed by:
//!
//! - the accept loop, which stops taking new connections
//! - the Bot API client, which abandons pending retries
//!
//! In-flight requests then get a bounded drain period. Whatever is still
//! running when it ends is dropped.

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time in-flight requests get to finish after shutdown starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for SIGINT or SIGTERM, then cancels `token`.
///
/// Returns early, without a signal, if `token` is cancelled elsewhere.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = token.cancelled() => return,
    }

    token.cancel();
}

/// Serves `router` on `listener` until `token` is cancelled, then drains.
///
/// Peer addresses are exposed to handlers as
/// [`ConnectInfo<SocketAddr>`](axum::extract::ConnectInfo).
///
/// # Errors
///
/// Returns the I/O error that stopped the accept loop, if any.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    token: CancellationToken,
    drain_timeout: Duration,
) -> io::Result<()> {
    let stop_accepting = token.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { stop_accepting.cancelled().await });

    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => return result,
        _ = token.cancelled() => {}
    }

    info!(
        timeout_secs = drain_timeout.as_secs(),
        "Waiting for in-flight requests to complete"
    );

    match tokio::time::timeout(drain_timeout, server).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Drain period elapsed, dropping remaining connections");
            Ok(())
        }
    }
}
