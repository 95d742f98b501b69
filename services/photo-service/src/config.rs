use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the photo service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// S3 configuration (connectivity probe)
    #[serde(default)]
    pub s3: S3Config,
    /// Image generation API configuration
    pub generator: GeneratorConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Fixed UTC offset used when rendering record timestamps
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations when the server starts. Deployments normally run
    /// `photo-migrate` instead.
    #[serde(default)]
    pub run_migrations: bool,
}

/// S3 configuration for the connectivity probe
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Static access key; falls back to the default AWS provider chain when unset
    pub access_key_id: Option<String>,
    /// Static secret key paired with `access_key_id`
    pub secret_access_key: Option<Secret<String>>,
}

/// Image generation API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Bearer token for the image generation API
    pub api_key: Secret<String>,
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_generator_base_url")]
    pub base_url: String,
    /// Image model name
    #[serde(default = "default_generator_model")]
    pub model: String,
    /// Requested image size (always square)
    #[serde(default = "default_image_size")]
    pub size: String,
    /// Requested image quality
    #[serde(default = "default_image_quality")]
    pub quality: String,
    /// Style and safety prefix prepended to every prompt
    #[serde(default = "default_prompt_prefix")]
    pub prompt_prefix: String,
    /// Upstream request timeout in seconds
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingRequired(&'static str),

    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// Default value functions
fn default_service_name() -> String {
    "photo-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_utc_offset_hours() -> i32 {
    9 // KST
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_region() -> String {
    "ap-northeast-2".to_string()
}

fn default_generator_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_generator_model() -> String {
    "dall-e-3".to_string()
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

fn default_image_quality() -> String {
    "standard".to_string()
}

fn default_prompt_prefix() -> String {
    "A family-friendly, softly lit digital illustration with no text or logos: ".to_string()
}

fn default_generator_timeout_secs() -> u64 {
    120
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from `.env`, config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env is normal outside local development
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .set_default("service.name", "photo-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?;

        // Conventional variable names act as the lowest-priority source
        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_default("database.url", url)?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            builder = builder.set_default("generator.api_key", key)?;
        }

        let config: Config = builder
            .add_source(config::File::with_name("config/photo-service").required(false))
            .add_source(config::File::with_name("/etc/photo-service/photo-service").required(false))
            // PHOTO__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("PHOTO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::MissingRequired("database.url"));
        }
        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(ConfigError::Invalid {
                field: "database.url",
                reason: "expected a postgres:// or postgresql:// URL".to_string(),
            });
        }
        if self.generator.api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingRequired("generator.api_key"));
        }
        if !(-12..=14).contains(&self.service.utc_offset_hours) {
            return Err(ConfigError::Invalid {
                field: "service.utc_offset_hours",
                reason: format!("{} is outside -12..=14", self.service.utc_offset_hours),
            });
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl GeneratorConfig {
    /// Upstream request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
