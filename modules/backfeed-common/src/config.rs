use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When unset the relay runs on the
    /// in-memory store (single-process deployments and local runs).
    pub database_url: Option<String>,

    /// Public base URL of this deployment, used to build the local comment
    /// permalinks that webmentions are sent from.
    pub base_url: String,

    /// Path to a JSON file of sources to upsert at startup.
    pub sources_file: Option<String>,

    /// Number of concurrent queue workers.
    pub workers: usize,

    /// Timeout for outbound HTTP (silo fetches, webmention sends), seconds.
    pub http_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            base_url: required_env("BASE_URL"),
            sources_file: env::var("SOURCES_FILE").ok(),
            workers: env::var("WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .expect("WORKERS must be a number"),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("HTTP_TIMEOUT_SECS must be a number"),
        }
    }

    /// Log the loaded configuration with credentials elided.
    pub fn log_redacted(&self) {
        tracing::info!(
            database = self.database_url.is_some(),
            base_url = self.base_url.as_str(),
            sources_file = ?self.sources_file,
            workers = self.workers,
            http_timeout_secs = self.http_timeout_secs,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
