pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod provider;
pub mod rate_limit;
pub mod realtime;
pub mod routes;
pub mod server;

pub use cache::{CacheWarmer, ContentCache, ResponseCache};
pub use config::{AppConfig, CacheConfig, RateLimitConfig, ServerConfig, TelemetryConfig};
pub use error::ApiError;
pub use observability::init_tracing;
pub use provider::{ComicSource, MemorySource};
pub use realtime::RealtimeBroadcaster;
pub use server::{AppState, KomikServer, ServerBuilder, build_app, build_router};
