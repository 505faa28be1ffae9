use std::net::SocketAddr;
use std::sync::Arc;

use komik_server::provider::MemorySource;
use komik_server::{AppConfig, AppState, build_router};
use serde_json::Value;

async fn start_server(config: AppConfig) -> (String, tokio::sync::oneshot::Sender<()>) {
    let state = AppState::new(&config, Arc::new(MemorySource::sample()));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = rx.await;
        })
        .await;
    });

    (format!("http://{addr}"), tx)
}

fn tight_limits() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.rate_limit.default.max_requests = 3;
    cfg.rate_limit.strict.max_requests = 2;
    cfg
}

#[tokio::test]
async fn strict_tier_rejects_with_retry_information() {
    let (base, tx) = start_server(tight_limits()).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/search?q=piece");

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-ratelimit-limit"], "2");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "1");

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

    let third = client.get(&url).send().await.unwrap();
    assert_eq!(third.status(), 429);
    let retry_after: u64 = third.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body: Value = third.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    let retry_ms = body["retryAfter"].as_u64().unwrap();
    assert!(retry_ms > 0 && retry_ms <= 60_000);

    let _ = tx.send(());
}

#[tokio::test]
async fn tiers_are_counted_separately() {
    let (base, tx) = start_server(tight_limits()).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let res = client
            .get(format!("{base}/api/search?q=lock"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    // Strict tier is exhausted, the default tier still has room.
    let res = client
        .get(format!("{base}/api/terbaru"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-ratelimit-limit"], "3");

    let _ = tx.send(());
}

#[tokio::test]
async fn untrusted_forwarded_header_does_not_reset_budget() {
    let (base, tx) = start_server(tight_limits()).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/cache/stats");

    for i in 0..2 {
        let res = client
            .get(&url)
            .header("x-forwarded-for", format!("203.0.113.{i}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }
    let res = client
        .get(&url)
        .header("x-forwarded-for", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);

    let _ = tx.send(());
}

#[tokio::test]
async fn health_and_metrics_are_not_limited() {
    let (base, tx) = start_server(tight_limits()).await;
    let client = reqwest::Client::new();

    for _ in 0..10 {
        let res = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(!res.headers().contains_key("x-ratelimit-limit"));
    }

    let _ = tx.send(());
}

#[tokio::test]
async fn disabled_limiter_admits_everything() {
    let mut cfg = tight_limits();
    cfg.rate_limit.enabled = false;
    let (base, tx) = start_server(cfg).await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let res = client
            .get(format!("{base}/api/search?q=solo"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    let _ = tx.send(());
}
