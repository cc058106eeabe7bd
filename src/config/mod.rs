//! Configuration management for the regsync pipeline
//!
//! Configuration is loaded from a TOML file or from `REGSYNC_*` environment
//! variables. Missing credentials are reported as [`Error::Config`] before
//! any work starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete regsync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registrar API configuration
    pub upstream: UpstreamConfig,

    /// Evaluation portal configuration
    pub evaluations: EvaluationConfig,

    /// Snapshot store configuration
    pub database: DatabaseConfig,

    /// Republish cache configuration
    pub cache: CacheConfig,

    /// Batch/fan-out tuning
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Registrar API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the authenticated course API
    pub base_url: String,

    /// Long-lived bearer token for the authenticated API
    pub api_token: Option<String>,

    /// Public course-offerings page carrying the embedded listings token
    pub reg_listings_page_url: String,

    /// Base URL of the public listings API
    pub reg_listings_api_url: String,

    /// How long a scraped listings token is reused
    pub public_token_ttl_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Requests per second across all upstream calls
    pub rate_limit: u32,

    /// Retries for 429/5xx/timeouts
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries
    pub retry_base_delay_ms: u64,

    /// User agent string
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.registrar.edu/student-app"),
            api_token: None,
            reg_listings_page_url: String::from("https://registrar.edu/course-offerings"),
            reg_listings_api_url: String::from("https://api.registrar.edu/registrar/course-offerings"),
            public_token_ttl_secs: 600,
            request_timeout_secs: 30,
            rate_limit: 5,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            user_agent: format!("regsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Evaluation portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Evaluation page URL; `courseinfo`/`terminfo` are appended as query
    pub base_url: String,

    /// Operator-supplied session cookie value
    pub session_cookie: Option<String>,

    /// Name of the session cookie
    pub cookie_name: String,

    /// Courses scraped per batch
    pub batch_size: usize,

    /// Fixed pause between batches
    pub batch_delay_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://registrarapps.registrar.edu/course-evaluation"),
            session_cookie: None,
            cookie_name: String::from("PHPSESSID"),
            batch_size: 10,
            batch_delay_ms: 2000,
        }
    }
}

/// Snapshot store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/snapshot.db"),
        }
    }
}

/// Republish cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL; an in-process cache is used when unset
    pub redis_url: Option<String>,

    /// Connection pool size
    pub pool_size: usize,

    /// TTL of republished term snapshots in seconds
    pub ttl_secs: u64,

    /// Key prefix for namespacing (empty for bare `courses-{term}` keys)
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            pool_size: 4,
            ttl_secs: 86400,
            key_prefix: String::new(),
        }
    }
}

/// Batch and fan-out tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Course ids per seats request. Larger batches time out upstream,
    /// smaller ones waste round trips.
    pub seat_batch_size: usize,

    /// Concurrent course-detail requests
    pub max_in_flight: usize,

    /// Start offset between requests of the same pool
    pub stagger_ms: u64,

    /// Random extra delay added to each start offset
    pub jitter_ms: u64,

    /// Sleep between passes of `seats --forever`
    pub seat_poll_interval_secs: u64,

    /// Departments to reconcile; empty means every department upstream lists
    pub departments: Vec<String>,

    /// Use the public registrar listings for department discovery and
    /// distribution-area fallback
    pub use_reg_listings: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seat_batch_size: 300,
            max_in_flight: 5,
            stagger_ms: 250,
            jitter_ms: 150,
            seat_poll_interval_secs: 300,
            departments: Vec::new(),
            use_reg_listings: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from `REGSYNC_*` variables (plus `REDIS_URL`)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let upstream = UpstreamConfig {
            base_url: env_or("REGSYNC_API_BASE_URL", defaults.upstream.base_url),
            api_token: env_opt("REGSYNC_API_TOKEN"),
            reg_listings_page_url: env_or(
                "REGSYNC_LISTINGS_PAGE_URL",
                defaults.upstream.reg_listings_page_url,
            ),
            reg_listings_api_url: env_or(
                "REGSYNC_LISTINGS_API_URL",
                defaults.upstream.reg_listings_api_url,
            ),
            public_token_ttl_secs: env_or(
                "REGSYNC_PUBLIC_TOKEN_TTL",
                defaults.upstream.public_token_ttl_secs,
            ),
            request_timeout_secs: env_or(
                "REGSYNC_REQUEST_TIMEOUT",
                defaults.upstream.request_timeout_secs,
            ),
            rate_limit: env_or("REGSYNC_RATE_LIMIT", defaults.upstream.rate_limit),
            max_retries: env_or("REGSYNC_MAX_RETRIES", defaults.upstream.max_retries),
            retry_base_delay_ms: defaults.upstream.retry_base_delay_ms,
            user_agent: env_or("REGSYNC_USER_AGENT", defaults.upstream.user_agent),
        };

        let evaluations = EvaluationConfig {
            base_url: env_or("REGSYNC_EVAL_URL", defaults.evaluations.base_url),
            session_cookie: env_opt("REGSYNC_EVAL_COOKIE"),
            cookie_name: env_or("REGSYNC_EVAL_COOKIE_NAME", defaults.evaluations.cookie_name),
            batch_size: env_or("REGSYNC_EVAL_BATCH_SIZE", defaults.evaluations.batch_size),
            batch_delay_ms: env_or("REGSYNC_EVAL_BATCH_DELAY_MS", defaults.evaluations.batch_delay_ms),
        };

        let database = DatabaseConfig {
            sqlite_path: env_or("REGSYNC_SQLITE_PATH", defaults.database.sqlite_path),
        };

        let cache = CacheConfig {
            redis_url: env_opt("REDIS_URL"),
            pool_size: env_or("REDIS_POOL_SIZE", defaults.cache.pool_size),
            ttl_secs: env_or("REGSYNC_CACHE_TTL", defaults.cache.ttl_secs),
            key_prefix: env_or("REGSYNC_CACHE_PREFIX", defaults.cache.key_prefix),
        };

        let departments = env_opt("REGSYNC_DEPARTMENTS")
            .map(|v| {
                v.split(',')
                    .map(|d| d.trim().to_uppercase())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let pipeline = PipelineConfig {
            seat_batch_size: env_or("REGSYNC_SEAT_BATCH_SIZE", defaults.pipeline.seat_batch_size),
            max_in_flight: env_or("REGSYNC_MAX_IN_FLIGHT", defaults.pipeline.max_in_flight),
            stagger_ms: env_or("REGSYNC_STAGGER_MS", defaults.pipeline.stagger_ms),
            jitter_ms: env_or("REGSYNC_JITTER_MS", defaults.pipeline.jitter_ms),
            seat_poll_interval_secs: env_or(
                "REGSYNC_SEAT_POLL_INTERVAL",
                defaults.pipeline.seat_poll_interval_secs,
            ),
            departments,
            use_reg_listings: env_or("REGSYNC_USE_REG_LISTINGS", defaults.pipeline.use_reg_listings),
        };

        let logging = LoggingConfig {
            level: env_or("REGSYNC_LOG_LEVEL", defaults.logging.level),
            format: env_or("REGSYNC_LOG_FORMAT", defaults.logging.format),
        };

        Ok(Self {
            upstream,
            evaluations,
            database,
            cache,
            pipeline,
            logging,
        })
    }

    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!("Failed to parse TOML config file {}: {e}", path.display()))
        })
    }

    /// Reject zero-valued tuning knobs and an empty database path
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.seat_batch_size == 0 {
            return Err(Error::config("seat_batch_size must be greater than 0"));
        }

        if self.pipeline.max_in_flight == 0 {
            return Err(Error::config("max_in_flight must be greater than 0"));
        }

        if self.upstream.rate_limit == 0 {
            return Err(Error::config("rate_limit must be positive"));
        }

        if self.evaluations.batch_size == 0 {
            return Err(Error::config("evaluation batch_size must be greater than 0"));
        }

        if self.database.sqlite_path.as_os_str().is_empty() {
            return Err(Error::config("database sqlite_path is not set"));
        }

        Ok(())
    }

    /// Bearer token for the authenticated API; fatal when unset
    pub fn require_api_token(&self) -> Result<&str> {
        self.upstream
            .api_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::config("upstream api_token is not set (REGSYNC_API_TOKEN)"))
    }

    /// Evaluation portal session cookie; fatal when unset
    pub fn require_session_cookie(&self) -> Result<&str> {
        self.evaluations
            .session_cookie
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                Error::config("evaluations session_cookie is not set (REGSYNC_EVAL_COOKIE)")
            })
    }

    /// Timeout applied to every upstream and evaluation request
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.request_timeout_secs)
    }
}
