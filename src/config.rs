//! Configuration loading and types for s3www.
//!
//! Configuration is assembled in three layers: built-in defaults, an
//! optional YAML file deserialized into [`Config`], and command-line flags
//! (each also settable through an `S3WWW_*` environment variable) captured
//! by [`ConfigOverrides`].  [`Config::validate`] then rejects anything the
//! server cannot start with.

use clap::Args;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Object store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Directory-existence cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address, `ADDRESS:PORT`; ADDRESS can be an IP or hostname.
    #[serde(default = "default_address")]
    pub address: String,

    /// PEM certificate chain; enables HTTPS together with `tls_key`.
    #[serde(default)]
    pub tls_cert: String,

    /// PEM private key matching `tls_cert`.
    #[serde(default)]
    pub tls_key: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            tls_cert: String::new(),
            tls_key: String::new(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// True when both TLS files are configured.
    pub fn tls_enabled(&self) -> bool {
        !self.tls_cert.is_empty() && !self.tls_key.is_empty()
    }
}

/// Object store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// S3 server endpoint, e.g. `https://play.min.io`.  Empty means the
    /// SDK's default AWS endpoint resolution.
    #[serde(default)]
    pub endpoint: String,

    /// Bucket name which hosts the static files.
    #[serde(default)]
    pub bucket: String,

    /// Region; derived from the endpoint when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Force path-style (`true`) or virtual-host style (`false`) requests.
    #[serde(default)]
    pub use_path_style: Option<bool>,

    /// Access key of the S3 storage.
    #[serde(default)]
    pub access_key: String,

    /// File which contains the access key.
    #[serde(default)]
    pub access_key_file: String,

    /// Secret key of the S3 storage.
    #[serde(default)]
    pub secret_key: String,

    /// File which contains the secret key.
    #[serde(default)]
    pub secret_key_file: String,
}

impl StorageConfig {
    /// Host part of the configured endpoint, if any.
    pub fn endpoint_host(&self) -> anyhow::Result<Option<String>> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Ok(None);
        }
        let uri: http::Uri = endpoint
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid endpoint URL {endpoint:?}: {e}"))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => anyhow::bail!("invalid endpoint URL {endpoint:?}: scheme must be http or https"),
        }
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow::anyhow!("invalid endpoint URL {endpoint:?}: missing host"))?;
        Ok(Some(host.to_string()))
    }

    /// Static credentials, when both keys are configured.
    ///
    /// Key files take precedence over inline keys; their contents are
    /// trimmed.  Returns `None` when the default AWS credential chain
    /// should be used instead.
    pub fn static_credentials(&self) -> anyhow::Result<Option<(String, String)>> {
        let access_key = read_key(&self.access_key, &self.access_key_file, "access key")?;
        let secret_key = read_key(&self.secret_key, &self.secret_key_file, "secret key")?;
        if access_key.is_empty() || secret_key.is_empty() {
            return Ok(None);
        }
        Ok(Some((access_key, secret_key)))
    }

    /// Check the settings required to talk to the bucket.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.trim().is_empty() {
            anyhow::bail!(
                "Bucket name cannot be empty, please provide 's3www --bucket \"mybucket\"'"
            );
        }
        self.endpoint_host()?;
        Ok(())
    }
}

/// Directory-existence cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Time to keep cached directory answers (Go-style duration, e.g. `5m`).
    /// `0` keeps them forever.
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,

    /// Interval between purges of expired entries.  `0` disables purging.
    #[serde(default = "default_cache_cleanup_interval")]
    pub cleanup_interval: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            cleanup_interval: default_cache_cleanup_interval(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.ttl)
            .map_err(|e| anyhow::anyhow!("invalid cache.ttl {:?}: {e}", self.ttl))
    }

    pub fn cleanup_interval(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.cleanup_interval).map_err(|e| {
            anyhow::anyhow!(
                "invalid cache.cleanup_interval {:?}: {e}",
                self.cleanup_interval
            )
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Metrics are recorded whenever `metrics` is on, but only exposed when an
/// `address` is configured: the website owns the whole path namespace of
/// the main listener, so `/metrics` and `/healthz` live on their own port.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Bind address of the metrics/health listener; empty disables it.
    #[serde(default)]
    pub address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            address: String::new(),
        }
    }
}

// -- Command-line / environment overrides ------------------------------------

/// Settings that may be given as flags or `S3WWW_*` environment variables.
/// Anything set here overrides the YAML file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// S3 server endpoint.
    #[arg(long, env = "S3WWW_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Access key of S3 storage.
    #[arg(long = "accessKey", alias = "access-key", env = "S3WWW_ACCESS_KEY")]
    pub access_key: Option<String>,

    /// File which contains the access key.
    #[arg(
        long = "accessKeyFile",
        alias = "access-key-file",
        env = "S3WWW_ACCESS_KEY_FILE"
    )]
    pub access_key_file: Option<String>,

    /// Secret key of S3 storage.
    #[arg(long = "secretKey", alias = "secret-key", env = "S3WWW_SECRET_KEY")]
    pub secret_key: Option<String>,

    /// File which contains the secret key.
    #[arg(
        long = "secretKeyFile",
        alias = "secret-key-file",
        env = "S3WWW_SECRET_KEY_FILE"
    )]
    pub secret_key_file: Option<String>,

    /// Bucket name which hosts static files.
    #[arg(long, env = "S3WWW_BUCKET")]
    pub bucket: Option<String>,

    /// Region of the bucket.
    #[arg(long, env = "S3WWW_REGION")]
    pub region: Option<String>,

    /// Bind to a specific ADDRESS:PORT, ADDRESS can be an IP or hostname.
    #[arg(long, env = "S3WWW_ADDRESS")]
    pub address: Option<String>,

    /// TLS certificate for this server.
    #[arg(long = "ssl-cert", env = "S3WWW_SSL_CERT")]
    pub tls_cert: Option<String>,

    /// TLS private key for this server.
    #[arg(long = "ssl-key", env = "S3WWW_SSL_KEY")]
    pub tls_key: Option<String>,

    /// Time to keep cache about directory listings.
    #[arg(long = "cache-time", env = "S3WWW_CACHE_TIME")]
    pub cache_time: Option<String>,

    /// Interval between purges of expired directory cache entries.
    #[arg(long = "cache-cleanup", env = "S3WWW_CACHE_CLEANUP")]
    pub cache_cleanup: Option<String>,

    /// Bind address of the metrics/health listener.
    #[arg(long = "metrics-address", env = "S3WWW_METRICS_ADDRESS")]
    pub metrics_address: Option<String>,
}

impl ConfigOverrides {
    /// Overlay every set field onto `config`.
    pub fn apply(self, config: &mut Config) {
        let storage = &mut config.storage;
        set(&mut storage.endpoint, self.endpoint);
        set(&mut storage.access_key, self.access_key);
        set(&mut storage.access_key_file, self.access_key_file);
        set(&mut storage.secret_key, self.secret_key);
        set(&mut storage.secret_key_file, self.secret_key_file);
        set(&mut storage.bucket, self.bucket);
        if self.region.is_some() {
            storage.region = self.region;
        }

        let server = &mut config.server;
        set(&mut server.address, self.address);
        set(&mut server.tls_cert, self.tls_cert);
        set(&mut server.tls_key, self.tls_key);

        set(&mut config.cache.ttl, self.cache_time);
        set(&mut config.cache.cleanup_interval, self.cache_cleanup);
        set(&mut config.observability.address, self.metrics_address);
    }
}

fn set(field: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn read_key(inline: &str, file: &str, what: &str) -> anyhow::Result<String> {
    if file.is_empty() {
        return Ok(inline.trim().to_string());
    }
    let contents = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {what} file {file:?}: {e}"))?;
    Ok(contents.trim().to_string())
}

impl Config {
    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.storage.validate()?;
        self.cache.ttl()?;
        self.cache.cleanup_interval()?;
        if self.server.tls_cert.is_empty() != self.server.tls_key.is_empty() {
            anyhow::bail!("both an SSL certificate and an SSL key are required to enable HTTPS");
        }
        Ok(())
    }
}

// -- Durations ----------------------------------------------------------------

/// Parse a Go-style duration such as `300ms`, `1.5h`, `5m` or `1h30m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`.  A bare
/// `0` is accepted; negative durations are not.
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        anyhow::bail!("negative durations are not allowed");
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            anyhow::bail!("expected a number in {input:?}");
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number in {input:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => anyhow::bail!("missing unit in duration {input:?}"),
            unit => anyhow::bail!("unknown unit {unit:?} in duration {input:?}"),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        anyhow::bail!("duration {input:?} is out of range");
    }
    Ok(Duration::from_nanos(total as u64))
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> String {
    "5m".to_string()
}

fn default_cache_cleanup_interval() -> String {
    "10m".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with_bucket(bucket: &str) -> Config {
        let mut config = Config::default();
        config.storage.bucket = bucket.to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:8080");
        assert_eq!(config.cache.ttl().unwrap(), Duration::from_secs(300));
        assert_eq!(
            config.cache.cleanup_interval().unwrap(),
            Duration::from_secs(600)
        );
        assert!(!config.server.tls_enabled());
        assert!(config.observability.metrics);
        assert!(config.observability.address.is_empty());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("42ns").unwrap(), Duration::from_nanos(42));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5 minutes").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  address: "0.0.0.0:9000"
storage:
  endpoint: "https://play.min.io"
  bucket: "website"
  use_path_style: true
cache:
  ttl: "1m"
logging:
  format: json
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.address, "0.0.0.0:9000");
        assert_eq!(config.storage.bucket, "website");
        assert_eq!(config.storage.use_path_style, Some(true));
        assert_eq!(config.cache.ttl().unwrap(), Duration::from_secs(60));
        // Unset sections and fields keep their defaults.
        assert_eq!(config.cache.cleanup_interval, "10m");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = config_with_bucket("from-file");
        config.cache.ttl = "1m".to_string();

        ConfigOverrides {
            bucket: Some("from-flag".to_string()),
            cache_time: Some("30s".to_string()),
            region: Some("eu-central-1".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.storage.bucket, "from-flag");
        assert_eq!(config.cache.ttl, "30s");
        assert_eq!(config.storage.region.as_deref(), Some("eu-central-1"));
        // Untouched fields survive.
        assert_eq!(config.server.address, "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_requires_bucket() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("Bucket name cannot be empty"));
        assert!(config_with_bucket("   ").validate().is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        let mut config = config_with_bucket("site");
        config.storage.endpoint = "https://s3.eu-west-1.amazonaws.com".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.storage.endpoint_host().unwrap().as_deref(),
            Some("s3.eu-west-1.amazonaws.com")
        );

        config.storage.endpoint = "play.min.io".to_string();
        assert!(config.validate().is_err());

        config.storage.endpoint = "ftp://play.min.io".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_cache_durations() {
        let mut config = config_with_bucket("site");
        config.cache.ttl = "five minutes".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tls_pair() {
        let mut config = config_with_bucket("site");
        config.server.tls_cert = "cert.pem".to_string();
        assert!(config.validate().is_err());
        config.server.tls_key = "key.pem".to_string();
        assert!(config.validate().is_ok());
        assert!(config.server.tls_enabled());
    }

    #[test]
    fn test_static_credentials_inline() {
        let mut storage = StorageConfig::default();
        assert!(storage.static_credentials().unwrap().is_none());

        storage.access_key = "AKIA".to_string();
        assert!(storage.static_credentials().unwrap().is_none());

        storage.secret_key = "secret".to_string();
        assert_eq!(
            storage.static_credentials().unwrap(),
            Some(("AKIA".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_static_credentials_from_files() {
        let mut access = tempfile::NamedTempFile::new().unwrap();
        writeln!(access, "  file-access  ").unwrap();
        let mut secret = tempfile::NamedTempFile::new().unwrap();
        writeln!(secret, "file-secret").unwrap();

        let storage = StorageConfig {
            access_key: "inline".to_string(),
            access_key_file: access.path().to_string_lossy().into_owned(),
            secret_key_file: secret.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        assert_eq!(
            storage.static_credentials().unwrap(),
            Some(("file-access".to_string(), "file-secret".to_string()))
        );
    }

    #[test]
    fn test_static_credentials_missing_file() {
        let storage = StorageConfig {
            access_key_file: "/nonexistent/s3www/access".to_string(),
            secret_key: "secret".to_string(),
            ..Default::default()
        };
        assert!(storage.static_credentials().is_err());
    }
}
