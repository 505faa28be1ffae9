use std::env;

use komik_server::ServerBuilder;
use komik_server::config::loader::load_config;

const DEFAULT_CONFIG: &str = "komik.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigSource {
    Flag,
    Env,
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Flag => "--config",
            Self::Env => "KOMIK_CONFIG",
            Self::Default => "default",
        })
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: failed to load .env: {e}");
    }

    komik_server::observability::init_tracing();

    let (config_path, source) = config_path(env::args().skip(1), env::var("KOMIK_CONFIG").ok());

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );

    komik_server::observability::apply_logging_level(&cfg.logging.level);
    komik_server::metrics::init_metrics();

    let server = match ServerBuilder::new().with_config(cfg).build() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}

/// `--config <path>` (or `--config=<path>`) wins over `KOMIK_CONFIG`.
fn config_path(
    mut args: impl Iterator<Item = String>,
    env_path: Option<String>,
) -> (String, ConfigSource) {
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return (path.to_string(), ConfigSource::Flag);
        }
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::Flag);
        }
    }

    match env_path.filter(|p| !p.is_empty()) {
        Some(path) => (path, ConfigSource::Env),
        None => (DEFAULT_CONFIG.to_string(), ConfigSource::Default),
    }
}
