use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use komik_core::cache::CacheStore;
use komik_core::rate_limit::RateLimiter;
use komik_core::telemetry::PerformanceMonitor;
use tokio::task::JoinHandle;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::cache::{CacheWarmer, ContentCache, ResponseCache};
use crate::config::AppConfig;
use crate::middleware as app_middleware;
use crate::provider::{ComicSource, MemorySource};
use crate::rate_limit::{ClientIdentity, RateLimitState, enforce};
use crate::realtime::{MonitorSnapshots, RealtimeBroadcaster};
use crate::{metrics, routes};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<ResponseCache>,
    pub content_cache: ContentCache,
    pub limiter: Arc<RateLimiter>,
    pub monitor: Arc<PerformanceMonitor>,
    pub realtime: Arc<RealtimeBroadcaster>,
    pub warmer: Arc<CacheWarmer>,
    pub source: Arc<dyn ComicSource>,
}

impl AppState {
    pub fn new(cfg: &AppConfig, source: Arc<dyn ComicSource>) -> Self {
        let cache = Arc::new(CacheStore::new(cfg.cache.capacity, cfg.cache.eviction));
        let content_cache = ContentCache::new(cache.clone(), cfg.cache.clone());
        let monitor = Arc::new(PerformanceMonitor::new(cfg.telemetry.monitor_config()));
        let realtime = Arc::new(RealtimeBroadcaster::new(
            Arc::new(MonitorSnapshots::new(
                monitor.clone(),
                cfg.telemetry.recent_window(),
            )),
            cfg.telemetry.push_interval(),
        ));
        let warmer = Arc::new(CacheWarmer::new(
            routes::content::router(source.clone(), &content_cache),
            cache.clone(),
            routes::content::NAMESPACES.to_vec(),
        ));

        Self {
            config: Arc::new(cfg.clone()),
            cache,
            content_cache,
            limiter: Arc::new(cfg.rate_limit.limiter()),
            monitor,
            realtime,
            warmer,
            source,
        }
    }
}

/// Load the configured content source.
pub fn build_source(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ComicSource>> {
    let source = match &cfg.provider.fixtures {
        Some(path) => MemorySource::from_file(path)?,
        None => MemorySource::sample(),
    };
    tracing::info!(comics = source.len(), "content source loaded");
    Ok(Arc::new(
        source.with_latency(Duration::from_millis(cfg.provider.latency_ms)),
    ))
}

pub fn build_router(state: AppState) -> Router {
    let cfg = state.config.clone();
    let body_limit = cfg.server.body_limit_bytes;
    let rate_limit = RateLimitState {
        limiter: state.limiter.clone(),
        identity: Arc::new(ClientIdentity::new(cfg.rate_limit.trusted_networks())),
        enabled: cfg.rate_limit.enabled,
    };
    let monitor = state.monitor.clone();
    let content = routes::content::router(state.source.clone(), &state.content_cache);

    Router::new()
        .merge(routes::admin::router())
        .merge(routes::analytics::router())
        .merge(routes::health::router())
        .with_state(state)
        .merge(content)
        // Middleware stack (outermost last): trace -> compression/cors -> request id -> telemetry -> rate limit
        .layer(middleware::from_fn_with_state(rate_limit, enforce))
        .layer(middleware::from_fn_with_state(
            monitor,
            app_middleware::record_telemetry,
        ))
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            cache = res
                                .headers()
                                .get("x-cache")
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("-"),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Build the application router from configuration alone.
pub fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let source = build_source(cfg)?;
    Ok(build_router(AppState::new(cfg, source)))
}

/// Periodic cache purge and idle limiter eviction.
pub fn spawn_maintenance(state: &AppState) -> Vec<JoinHandle<()>> {
    let cache = state.cache.clone();
    let cache_every = state.config.cache.sweep_interval();
    let cache_sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired cache entries");
            }
            metrics::set_cache_entries(cache.len());
        }
    });

    let limiter = state.limiter.clone();
    let limiter_every = state.config.rate_limit.sweep_interval();
    let limiter_sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limiter.evict_idle();
        }
    });

    vec![cache_sweeper, limiter_sweeper]
}

pub struct KomikServer {
    addr: SocketAddr,
    state: AppState,
    app: Router,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    source: Option<Arc<dyn ComicSource>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            source: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ComicSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build(self) -> anyhow::Result<KomikServer> {
        let source = match self.source {
            Some(source) => source,
            None => build_source(&self.config)?,
        };
        let state = AppState::new(&self.config, source);
        let app = build_router(state.clone());

        Ok(KomikServer {
            addr: self.addr,
            state,
            app,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KomikServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let maintenance = spawn_maintenance(&self.state);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        for task in maintenance {
            task.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
