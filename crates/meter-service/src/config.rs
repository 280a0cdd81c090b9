//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Which storage backend the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local, non-durable. Development only.
    Memory,
    /// Embedded `RocksDB` under `data_dir`. Single instance only.
    RocksDb,
    /// `PostgreSQL` at `database_url`. Safe for replicated deployments.
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" | "rocks" => Ok(Self::RocksDb),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend.
    pub store_backend: StoreBackend,

    /// Path to `RocksDB` data directory (default: "/data/meter").
    pub data_dir: String,

    /// `PostgreSQL` connection URL (optional).
    pub database_url: Option<String>,

    /// `PostgreSQL` pool size.
    pub database_max_connections: u32,

    /// Deadline for a single store operation. Elapsed deadlines count as the
    /// store being unavailable.
    pub store_timeout: Duration,

    /// Limit applied when a quota request does not carry one.
    pub free_tier_limit: u64,

    /// Service API key for quota checks and billing event intake.
    pub service_api_key: Option<String>,

    /// Admin API key for quota resets.
    pub admin_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Database secrets file structure.
#[derive(Debug, Deserialize)]
struct DatabaseSecrets {
    url: String,
    #[serde(default)]
    max_connections: Option<u32>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (database_url, secrets_max_connections) = load_database_secrets();

        let store_backend = std::env::var("STORE_BACKEND")
            .ok()
            .and_then(|s| match s.parse() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring STORE_BACKEND");
                    None
                }
            })
            .unwrap_or_else(|| default_backend(database_url.is_some()));

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            store_backend,
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            database_url,
            database_max_connections: env_parse::<u32>("DATABASE_MAX_CONNECTIONS")
                .or(secrets_max_connections)
                .unwrap_or(defaults.database_max_connections),
            store_timeout: env_parse::<u64>("STORE_TIMEOUT_MS")
                .map_or(defaults.store_timeout, Duration::from_millis),
            free_tier_limit: env_parse::<u64>("FREE_TIER_LIMIT")
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.free_tier_limit),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| parse_origins(&s))
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse::<usize>("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse::<u64>("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }

    /// How long an embedded-store transaction waits for a row lock.
    ///
    /// Half of `store_timeout`, so a blocked `RocksDB` write gives up before
    /// the caller's deadline reports the call as failed.
    #[must_use]
    pub fn rocks_lock_timeout(&self) -> Duration {
        (self.store_timeout / 2).max(Duration::from_millis(1))
    }
}

/// Postgres when a database is configured, else the embedded store if built in.
fn default_backend(has_database: bool) -> StoreBackend {
    if has_database {
        StoreBackend::Postgres
    } else if cfg!(feature = "rocksdb-backend") {
        StoreBackend::RocksDb
    } else {
        StoreBackend::Memory
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Load the database URL from a secrets file or the environment.
fn load_database_secrets() -> (Option<String>, Option<u32>) {
    let secret_paths = [
        ".secrets/postgres.json",
        "meter/.secrets/postgres.json",
        "../.secrets/postgres.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<DatabaseSecrets>(path) {
            tracing::info!(path = %path, "Loaded database secrets from file");
            return (Some(secrets.url), secrets.max_connections);
        }
    }

    tracing::debug!("Database secrets file not found, using environment variables");
    (std::env::var("DATABASE_URL").ok(), None)
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            store_backend: default_backend(false),
            data_dir: "/data/meter".into(),
            database_url: None,
            database_max_connections: 10,
            store_timeout: Duration::from_millis(2000),
            free_tier_limit: 100,
            service_api_key: None,
            admin_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 64 * 1024,
            request_timeout_seconds: 10,
        }
    }
}
