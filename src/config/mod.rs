use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConverterError;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Conversion settings, loaded once and treated as immutable afterwards.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Bucket holding both source and converted objects (required)
    pub bucket: String,

    /// AWS region (default: "us-east-1")
    pub region: String,

    /// Custom S3 endpoint, e.g. MinIO (default: AWS)
    pub endpoint_url: Option<String>,

    /// Static credentials; when unset the default provider chain is used
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,

    /// Prefix listed during discovery (default: "")
    pub source_prefix: String,

    /// Prefix that replaces the source prefix in output keys (default: "webp-images")
    pub destination_prefix: String,

    /// WebP quality for opaque images, 0-100 (default: 100)
    pub quality: i32,

    /// Delete the source object after a successful upload (default: false)
    pub delete_original: bool,

    /// Concurrent conversions (default: 4)
    pub max_workers: usize,

    /// Tasks per progress checkpoint (default: 100)
    pub batch_size: usize,

    /// Skip sources whose WebP output already exists (default: true)
    pub skip_existing: bool,

    /// Report planned conversions without touching the store (default: false)
    pub dry_run: bool,

    /// Budget for existence check + fetch + transcode + store (default: 300s)
    pub task_timeout: Duration,

    /// Retries for transient fetch/store failures (default: 2)
    pub max_retries: u32,

    /// Default tracing level (default: "info")
    pub log_level: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            source_prefix: String::new(),
            destination_prefix: "webp-images".to_string(),
            quality: 100,
            delete_original: false,
            max_workers: 4,
            batch_size: 100,
            skip_existing: true,
            dry_run: false,
            task_timeout: Duration::from_secs(300),
            max_retries: 2,
            log_level: "info".to_string(),
        }
    }
}

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub dry_run: bool,
    pub prefix: Option<String>,
    pub quality: Option<i32>,
    pub max_workers: Option<usize>,
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConverterError>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConverterError::config(format!("{} has invalid value '{}': {}", name, raw, e))),
        None => Ok(default),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool, ConverterError> {
    match lookup(name) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConverterError::config(format!(
                "{} must be a boolean, got '{}'",
                name, other
            ))),
        },
        None => Ok(default),
    }
}

/// Maps level names accepted by older deployments onto tracing's levels.
fn normalize_log_level(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

impl ConverterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConverterError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any key lookup. Unparsable values are errors;
    /// range checks happen in `validate`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConverterError> {
        let default = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bucket: lookup("S3_BUCKET_NAME").unwrap_or_default(),
            region: non_empty("AWS_DEFAULT_REGION").unwrap_or(default.region),
            endpoint_url: non_empty("S3_ENDPOINT_URL"),
            access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
            source_prefix: lookup("S3_PREFIX").unwrap_or(default.source_prefix),
            destination_prefix: lookup("S3_DESTINATION_PREFIX")
                .unwrap_or(default.destination_prefix),
            quality: parse_var(&lookup, "WEBP_QUALITY", default.quality)?,
            delete_original: parse_flag(&lookup, "DELETE_ORIGINAL", default.delete_original)?,
            max_workers: parse_var(&lookup, "MAX_WORKERS", default.max_workers)?,
            batch_size: parse_var(&lookup, "BATCH_SIZE", default.batch_size)?,
            skip_existing: parse_flag(&lookup, "SKIP_EXISTING", default.skip_existing)?,
            dry_run: parse_flag(&lookup, "DRY_RUN", default.dry_run)?,
            task_timeout: Duration::from_secs(parse_var(
                &lookup,
                "TASK_TIMEOUT_SECS",
                default.task_timeout.as_secs(),
            )?),
            max_retries: parse_var(&lookup, "MAX_RETRIES", default.max_retries)?,
            log_level: non_empty("LOG_LEVEL")
                .map(|v| normalize_log_level(&v))
                .unwrap_or(default.log_level),
        })
    }

    /// Returns a copy with command-line overrides applied.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if overrides.dry_run {
            self.dry_run = true;
        }
        if let Some(prefix) = &overrides.prefix {
            self.source_prefix = prefix.clone();
        }
        if let Some(quality) = overrides.quality {
            self.quality = quality;
        }
        if let Some(max_workers) = overrides.max_workers {
            self.max_workers = max_workers;
        }
        self
    }

    /// Rejects missing or out-of-range settings before any work is dispatched.
    pub fn validate(&self) -> Result<(), ConverterError> {
        if self.bucket.trim().is_empty() {
            return Err(ConverterError::config("S3_BUCKET_NAME must be set"));
        }
        if !(0..=100).contains(&self.quality) {
            return Err(ConverterError::config(format!(
                "WebP quality must be between 0 and 100, got {}",
                self.quality
            )));
        }
        if self.max_workers == 0 {
            return Err(ConverterError::config("max workers must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConverterError::config("batch size must be at least 1"));
        }
        if self.task_timeout.is_zero() {
            return Err(ConverterError::config("task timeout must be greater than zero"));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConverterError::config(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together",
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConverterError::config(format!(
                "LOG_LEVEL must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.log_level
            )));
        }
        Ok(())
    }

    /// Quality clamped into the codec's range. Only meaningful after `validate`.
    pub fn webp_quality(&self) -> u8 {
        self.quality.clamp(0, 100) as u8
    }

    /// Config for tests and local experiments.
    pub fn development(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            task_timeout: Duration::from_secs(30),
            max_retries: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ConverterConfig::default();
        assert_eq!(config.quality, 100);
        assert!(!config.delete_original);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.destination_prefix, "webp-images");
        assert!(config.skip_existing);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_missing_bucket_is_rejected() {
        let config = ConverterConfig::from_lookup(lookup_from(&[])).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConverterError::Configuration(_)));
    }

    #[test]
    fn test_loads_values_from_lookup() {
        let config = ConverterConfig::from_lookup(lookup_from(&[
            ("S3_BUCKET_NAME", "photos"),
            ("S3_PREFIX", "images/"),
            ("WEBP_QUALITY", "85"),
            ("DELETE_ORIGINAL", "true"),
            ("MAX_WORKERS", "8"),
            ("BATCH_SIZE", "25"),
            ("TASK_TIMEOUT_SECS", "60"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.bucket, "photos");
        assert_eq!(config.source_prefix, "images/");
        assert_eq!(config.quality, 85);
        assert!(config.delete_original);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.task_timeout, Duration::from_secs(60));
        assert_eq!(config.log_level, "debug");
        assert!(config.validate().is_ok());

        for (raw, expected) in [("WARNING", "warn"), ("Critical", "error"), (" info ", "info")] {
            let config = ConverterConfig::from_lookup(lookup_from(&[
                ("S3_BUCKET_NAME", "photos"),
                ("LOG_LEVEL", raw),
            ]))
            .unwrap();
            assert_eq!(config.log_level, expected);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_unparsable_value_fails_fast() {
        let err = ConverterConfig::from_lookup(lookup_from(&[
            ("S3_BUCKET_NAME", "photos"),
            ("MAX_WORKERS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_WORKERS"));

        let err = ConverterConfig::from_lookup(lookup_from(&[("DELETE_ORIGINAL", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("DELETE_ORIGINAL"));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let mut config = ConverterConfig::development("photos");
        config.quality = 101;
        assert!(config.validate().is_err());

        let mut config = ConverterConfig::development("photos");
        config.quality = -1;
        assert!(config.validate().is_err());

        let mut config = ConverterConfig::development("photos");
        config.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = ConverterConfig::development("photos");
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = ConfigOverrides {
            dry_run: true,
            prefix: Some("uploads/".to_string()),
            quality: Some(70),
            max_workers: Some(12),
        };
        let config = ConverterConfig::development("photos").with_overrides(&overrides);

        assert!(config.dry_run);
        assert_eq!(config.source_prefix, "uploads/");
        assert_eq!(config.quality, 70);
        assert_eq!(config.max_workers, 12);
        assert_eq!(config.webp_quality(), 70);
    }
}
