use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors found while checking a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the upload service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upload staging and media tool configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// Access token configuration
    pub auth: AuthConfig,
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
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for video storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
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
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Upload staging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// The one container type accepted for upload
    #[serde(default = "default_accepted_content_type")]
    pub accepted_content_type: String,
    /// Directory for staged uploads (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
    /// ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

/// Access token configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret access tokens are signed with
    pub jwt_secret: String,
    /// Expected `iss` claim
    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,
}

/// API configuration
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
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "upload-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_max_upload_bytes() -> u64 {
    1 << 30 // 1GB
}

fn default_accepted_content_type() -> String {
    "video/mp4".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_jwt_issuer() -> String {
    "tubely-access".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8091
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "upload-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/upload").required(false))
            .add_source(config::File::with_name("/etc/tubely/upload").required(false))
            // Override with environment variables
            // UPLOAD__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("UPLOAD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::MissingRequired("auth.jwt_secret".to_string()));
        }

        if self.upload.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "upload.max_upload_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        match self.upload.accepted_content_type.parse::<mime::Mime>() {
            Ok(m) if m.type_() == mime::VIDEO => Ok(()),
            Ok(_) => Err(ConfigError::InvalidValue {
                key: "upload.accepted_content_type".to_string(),
                message: "must be a video/* type".to_string(),
            }),
            Err(e) => Err(ConfigError::InvalidValue {
                key: "upload.accepted_content_type".to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            accepted_content_type: default_accepted_content_type(),
            temp_dir: None,
            ffprobe_path: default_ffprobe_path(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [service]
        [s3]
        bucket = "tubely-videos"
        [database]
        url = "postgres://localhost/tubely"
        [auth]
        jwt_secret = "secret"
    "#;

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_upload_bytes(), 1024 * 1024 * 1024);
        assert_eq!(default_accepted_content_type(), "video/mp4");
        assert_eq!(default_presigned_url_expiry_secs(), 3600);
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = from_toml(MINIMAL);

        assert_eq!(config.service.name, "upload-service");
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.upload.ffmpeg_path, "ffmpeg");
        assert_eq!(config.upload.temp_dir, None);
        assert_eq!(config.auth.jwt_issuer, "tubely-access");
        assert_eq!(config.api.port, 8091);
        assert_eq!(config.presigned_url_expiry(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = from_toml(MINIMAL);
        config.upload.accepted_content_type = "image/png".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = from_toml(MINIMAL);
        config.upload.max_upload_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = from_toml(MINIMAL);
        config.s3.bucket = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }
}
