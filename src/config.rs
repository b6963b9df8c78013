use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "NPR";
const DEV_DEFAULT_SERVICE_ROLE_KEY: &str = "dev_service_role_key_for_local_worker_processes_only";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Shared key authorizing service-role calls (worker drain, job acquire).
    /// Must be overridden outside development.
    #[validate(length(min = 32))]
    pub service_role_key: String,

    /// HMAC secret for verifying provider webhook signatures. Per-provider
    /// overrides take precedence when set.
    pub payment_webhook_secret: String,
    #[serde(default)]
    pub esewa_webhook_secret: Option<String>,
    #[serde(default)]
    pub khalti_webhook_secret: Option<String>,
    #[serde(default)]
    pub npx_webhook_secret: Option<String>,

    /// Honor the x-mock-signature header instead of real HMAC verification.
    /// Never enable outside test environments.
    #[serde(default)]
    pub webhook_test_mode: bool,

    /// Payment verification mode: "provider" re-verifies settlement with the
    /// gateway's verify API; "webhook" trusts the signed payload's claims.
    #[serde(default = "default_verify_mode")]
    #[validate(custom = "validate_verify_mode")]
    pub payment_verify_mode: String,

    /// Provider API endpoints (verify/session). Unset providers fall back to
    /// the mock gateway, which only makes sense in tests.
    #[serde(default)]
    pub esewa_base_url: Option<String>,
    #[serde(default)]
    pub khalti_base_url: Option<String>,
    #[serde(default)]
    pub npx_base_url: Option<String>,

    /// Timeout for provider HTTP calls (seconds)
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Run the in-process order worker loop
    #[serde(default = "default_true_bool")]
    pub worker_enabled: bool,

    /// Number of concurrent in-process worker loops
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: u32,

    /// Worker poll interval when the queue is empty (milliseconds)
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Job lease timeout (seconds); must exceed worst-case processing time
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// Maximum delivery attempts before a job is dead-lettered
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: i32,

    /// How long a booking-slot hold lives before expiring (seconds)
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    /// Interval for the expired-reservation sweeper (seconds)
    #[serde(default = "default_reservation_sweep_interval_secs")]
    pub reservation_sweep_interval_secs: u64,

    /// Currency used for carts and orders
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a minimal configuration, used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            service_role_key: DEV_DEFAULT_SERVICE_ROLE_KEY.to_string(),
            payment_webhook_secret: "test_webhook_secret".to_string(),
            esewa_webhook_secret: None,
            khalti_webhook_secret: None,
            npx_webhook_secret: None,
            webhook_test_mode: false,
            payment_verify_mode: default_verify_mode(),
            esewa_base_url: None,
            khalti_base_url: None,
            npx_base_url: None,
            provider_timeout_secs: default_provider_timeout_secs(),
            worker_enabled: false,
            worker_concurrency: default_worker_concurrency(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            lease_timeout_secs: default_lease_timeout_secs(),
            job_max_attempts: default_job_max_attempts(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            reservation_sweep_interval_secs: default_reservation_sweep_interval_secs(),
            default_currency: DEFAULT_CURRENCY.to_string(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn is_test(&self) -> bool {
        self.environment.eq_ignore_ascii_case("test")
    }

    /// Webhook secret for a provider, falling back to the shared secret.
    pub fn webhook_secret_for(&self, provider: &str) -> &str {
        let specific = match provider {
            "esewa" => self.esewa_webhook_secret.as_deref(),
            "khalti" => self.khalti_webhook_secret.as_deref(),
            "npx" => self.npx_webhook_secret.as_deref(),
            _ => None,
        };
        specific.unwrap_or(&self.payment_webhook_secret)
    }

    /// Base URL for a provider's verify/session API, if configured.
    pub fn provider_base_url(&self, provider: &str) -> Option<&str> {
        match provider {
            "esewa" => self.esewa_base_url.as_deref(),
            "khalti" => self.khalti_base_url.as_deref(),
            "npx" => self.npx_base_url.as_deref(),
            _ => None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_verify_mode() -> String {
    "provider".to_string()
}
fn default_provider_timeout_secs() -> u64 {
    10
}
fn default_true_bool() -> bool {
    true
}
fn default_worker_concurrency() -> u32 {
    2
}
fn default_worker_poll_interval_ms() -> u64 {
    500
}
fn default_lease_timeout_secs() -> u64 {
    60
}
fn default_job_max_attempts() -> i32 {
    5
}
fn default_reservation_ttl_secs() -> u64 {
    15 * 60
}
fn default_reservation_sweep_interval_secs() -> u64 {
    60
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_verify_mode(mode: &str) -> Result<(), ValidationError> {
    match mode {
        "provider" | "webhook" => Ok(()),
        _ => {
            let mut err = ValidationError::new("payment_verify_mode");
            err.message = Some("Must be one of: provider, webhook".into());
            Err(err)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    Insecure(String),
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("pasal_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. config/default.toml
/// 3. config/{env}.toml
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://pasal.db?mode=rwc")?
        .set_default("environment", run_env.clone())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let config = builder.build()?;

    // Secrets have no production defaults; fill the development fallbacks only
    // where it is safe to do so.
    let mut cfg: AppConfig = match config.clone().try_deserialize() {
        Ok(cfg) => cfg,
        Err(_) => {
            let mut patched = Config::builder().add_source(config);
            if run_env == "development" || run_env == "test" {
                patched = patched
                    .set_default("service_role_key", DEV_DEFAULT_SERVICE_ROLE_KEY)?
                    .set_default("payment_webhook_secret", "dev_webhook_secret")?;
            }
            patched.build()?.try_deserialize()?
        }
    };

    if !cfg.is_development() && !cfg.is_test() {
        if cfg.service_role_key == DEV_DEFAULT_SERVICE_ROLE_KEY {
            return Err(AppConfigError::Insecure(
                "service_role_key must be overridden outside development".to_string(),
            ));
        }
        if cfg.webhook_test_mode {
            return Err(AppConfigError::Insecure(
                "webhook_test_mode cannot be enabled outside development/test".to_string(),
            ));
        }
    }

    if cfg.default_currency.is_empty() {
        cfg.default_currency = DEFAULT_CURRENCY.to_string();
    }

    cfg.validate()?;
    Ok(cfg)
}
