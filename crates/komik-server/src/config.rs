use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ipnetwork::IpNetwork;
use komik_core::cache::EvictionPolicy;
use komik_core::rate_limit::{RateLimitTier, RateLimiter};
use komik_core::telemetry::MonitorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Performance telemetry and live stream configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Content provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Cache validations
        if self.cache.capacity == 0 {
            return Err("cache.capacity must be > 0".into());
        }
        if self.cache.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if let Some((ns, _)) = self.cache.routes.iter().find(|(_, ttl)| **ttl == 0) {
            return Err(format!("cache.routes.{ns} must be > 0"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        // Rate limit validations
        for (name, tier) in [
            ("default", &self.rate_limit.default),
            ("strict", &self.rate_limit.strict),
        ] {
            if tier.window_ms == 0 {
                return Err(format!("rate_limit.{name}.window_ms must be > 0"));
            }
            if tier.max_requests == 0 {
                return Err(format!("rate_limit.{name}.max_requests must be > 0"));
            }
        }
        if self.rate_limit.strict.max_requests > self.rate_limit.default.max_requests {
            return Err(
                "rate_limit.strict.max_requests must be <= rate_limit.default.max_requests".into(),
            );
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err("rate_limit.sweep_interval_secs must be > 0".into());
        }
        for proxy in &self.rate_limit.trusted_proxies {
            proxy
                .parse::<IpNetwork>()
                .map_err(|e| format!("rate_limit.trusted_proxies: invalid CIDR '{proxy}': {e}"))?;
        }
        // Telemetry validations
        if self.telemetry.window_size == 0 || self.telemetry.endpoint_window_size == 0 {
            return Err("telemetry window sizes must be > 0".into());
        }
        if self.telemetry.window_age_secs == 0 {
            return Err("telemetry.window_age_secs must be > 0".into());
        }
        if self.telemetry.max_endpoints == 0 {
            return Err("telemetry.max_endpoints must be > 0".into());
        }
        if self.telemetry.push_interval_ms < 100 {
            return Err("telemetry.push_interval_ms must be >= 100".into());
        }
        if self.telemetry.recent_window_secs == 0 {
            return Err("telemetry.recent_window_secs must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Response cache settings.
///
/// `routes` maps a cache namespace (`terbaru`, `detail`, `chapter`,
/// `search`) to its TTL in seconds. Namespaces without an entry use
/// `default_ttl_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub eviction: EvictionPolicy,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_route_ttls")]
    pub routes: HashMap<String, u64>,
    /// Responses larger than this are served but never stored.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_route_ttls() -> HashMap<String, u64> {
    HashMap::from([
        ("terbaru".to_string(), 300),
        ("detail".to_string(), 1800),
        ("chapter".to_string(), 3600),
        ("search".to_string(), 600),
    ])
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl CacheConfig {
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        let secs = self
            .routes
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            eviction: EvictionPolicy::default(),
            default_ttl_secs: default_ttl_secs(),
            routes: default_route_ttls(),
            max_body_bytes: default_max_body_bytes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl TierConfig {
    pub fn tier(&self) -> RateLimitTier {
        RateLimitTier::new(Duration::from_millis(self.window_ms), self.max_requests)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tier")]
    pub default: TierConfig,
    #[serde(default = "strict_tier")]
    pub strict: TierConfig,
    /// How long an idle client window is kept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Proxies (CIDR) whose `X-Forwarded-For` header is believed.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

fn default_tier() -> TierConfig {
    TierConfig {
        window_ms: 60_000,
        max_requests: 100,
    }
}
fn strict_tier() -> TierConfig {
    TierConfig {
        window_ms: 60_000,
        max_requests: 20,
    }
}
fn default_retention_secs() -> u64 {
    600
}

impl RateLimitConfig {
    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.default.tier(),
            self.strict.tier(),
            Duration::from_secs(self.retention_secs),
        )
    }

    /// Parsed trusted proxy networks. Invalid entries are rejected by
    /// [`AppConfig::validate`], so they are skipped here.
    pub fn trusted_networks(&self) -> Vec<IpNetwork> {
        self.trusted_proxies
            .iter()
            .filter_map(|cidr| cidr.parse().ok())
            .collect()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: default_tier(),
            strict: strict_tier(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            trusted_proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_window_age_secs")]
    pub window_age_secs: u64,
    #[serde(default = "default_endpoint_window_size")]
    pub endpoint_window_size: usize,
    #[serde(default = "default_max_endpoints")]
    pub max_endpoints: usize,
    /// Horizon of the "recent" response time pushed to dashboards.
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
}

fn default_window_size() -> usize {
    1000
}
fn default_window_age_secs() -> u64 {
    300
}
fn default_endpoint_window_size() -> usize {
    100
}
fn default_max_endpoints() -> usize {
    200
}
fn default_recent_window_secs() -> u64 {
    60
}
fn default_push_interval_ms() -> u64 {
    2500
}

impl TelemetryConfig {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            window_size: self.window_size,
            window_age: Duration::from_secs(self.window_age_secs),
            endpoint_window_size: self.endpoint_window_size,
            max_endpoints: self.max_endpoints,
            ..MonitorConfig::default()
        }
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.recent_window_secs)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_age_secs: default_window_age_secs(),
            endpoint_window_size: default_endpoint_window_size(),
            max_endpoints: default_max_endpoints(),
            recent_window_secs: default_recent_window_secs(),
            push_interval_ms: default_push_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    /// JSON fixture file with the catalogue. The built-in sample is used
    /// when unset.
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
    /// Artificial upstream latency, for load testing the cache.
    #[serde(default)]
    pub latency_ms: u64,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("komik.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., KOMIK__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("KOMIK")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("rate_limit.trusted_proxies"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cache.ttl_for("detail"), Duration::from_secs(1800));
        assert_eq!(cfg.cache.ttl_for("unknown"), Duration::from_secs(300));
        assert_eq!(cfg.telemetry.push_interval(), Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_trusted_proxy_rejected() {
        let mut cfg = AppConfig::default();
        cfg.rate_limit.trusted_proxies = vec!["10.0.0.0/8".into(), "not-a-cidr".into()];
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("not-a-cidr"));
    }

    #[test]
    fn test_zero_route_ttl_rejected() {
        let mut cfg = AppConfig::default();
        cfg.cache.routes.insert("search".into(), 0);
        assert_eq!(cfg.validate().unwrap_err(), "cache.routes.search must be > 0");
    }

    #[test]
    fn test_trusted_networks_parsed() {
        let mut cfg = RateLimitConfig::default();
        cfg.trusted_proxies = vec!["10.0.0.0/8".into(), "::1/128".into()];
        assert_eq!(cfg.trusted_networks().len(), 2);
    }
}
