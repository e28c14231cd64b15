//! Integration tests for serving and graceful shutdown over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use daytrack_server::config::Config;
use daytrack_server::routes::{create_router, AppState};
use daytrack_server::shutdown::serve;

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn test_app() -> Router {
    let config = Config {
        api_base_url: "http://127.0.0.1:1".to_string(),
        ..Config::for_chat("1:token", 1)
    };
    create_router(AppState::new(config).unwrap())
}

#[tokio::test]
async fn serves_until_cancelled() {
    let (listener, addr) = bind().await;
    let token = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        test_app(),
        token.clone(),
        Duration::from_secs(5),
    ));

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    token.cancel();

    let result = timeout(Duration::from_secs(10), server)
        .await
        .expect("server should stop after cancellation")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn loopback_peer_is_not_an_allowed_origin() {
    let (listener, addr) = bind().await;
    let token = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        test_app(),
        token.clone(),
        Duration::from_secs(5),
    ));

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/webhook"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let forwarded = reqwest::Client::new()
        .post(format!("http://{addr}/webhook"))
        .header("X-Forwarded-For", "149.154.167.220")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(forwarded.status(), 200);

    token.cancel();
    let _ = timeout(Duration::from_secs(10), server).await;
}

#[tokio::test]
async fn drain_period_bounds_slow_requests() {
    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(60)).await;
        "late"
    }

    let (listener, addr) = bind().await;
    let token = CancellationToken::new();
    let app = Router::new().route("/slow", get(slow));
    let server = tokio::spawn(serve(
        listener,
        app,
        token.clone(),
        Duration::from_millis(200),
    ));

    let in_flight = tokio::spawn(reqwest::get(format!("http://{addr}/slow")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    token.cancel();

    let result = timeout(Duration::from_secs(10), server)
        .await
        .expect("drain period should bound shutdown")
        .unwrap();
    assert!(result.is_ok());

    in_flight.abort();
}
