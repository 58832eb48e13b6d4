use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub webservice: WebserviceConfig,
    pub storage: StorageConfig,
    pub query: QueryConfig,
    pub aggregation: AggregationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebserviceConfig {
    /// Base URL of the webservice API, e.g. https://dockstore.org/api
    pub url: String,
    /// Bearer token used for metrics submission
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the raw execution objects
    pub root: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Base URL of the analytical query gateway
    pub url: String,
    pub database: String,
    pub table: String,
    /// Where the query engine writes result files
    pub output_location: String,
    /// Polling interval while a query runs (accepts "500ms", "1s")
    #[serde(deserialize_with = "deserialize_duration_millis")]
    pub poll_interval_ms: u64,
    /// Upper bound on one query's runtime (accepts "10m", "600")
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Number of aggregation units processed concurrently
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl QueryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. Load from the explicit path, or conf/config.toml / config.toml
    /// 2. Override with environment variables (prefixed with APP_)
    /// 3. Validate the final configuration
    pub fn load(explicit_path: Option<&str>) -> Result<Self, anyhow::Error> {
        let mut config = match explicit_path {
            Some(path) => Self::from_toml(path)?,
            None => {
                if let Some(config_path) = Self::find_config_file() {
                    Self::from_toml(&config_path)?
                } else {
                    tracing::warn!("Configuration file not found, using defaults");
                    Config::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_WEBSERVICE_URL / APP_WEBSERVICE_TOKEN
    /// - APP_STORAGE_ROOT
    /// - APP_QUERY_URL / APP_QUERY_DATABASE / APP_QUERY_TABLE / APP_QUERY_OUTPUT_LOCATION
    /// - APP_QUERY_POLL_INTERVAL: accepts "500ms", "1s"
    /// - APP_QUERY_TIMEOUT: accepts "600", "10m"
    /// - APP_AGGREGATION_WORKERS
    /// - APP_LOG_LEVEL: e.g. "info,metrics_aggregator=debug"
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("APP_WEBSERVICE_URL") {
            self.webservice.url = url;
            tracing::info!("Override webservice.url from env: {}", self.webservice.url);
        }

        if let Ok(token) = std::env::var("APP_WEBSERVICE_TOKEN") {
            self.webservice.token = Some(token);
            tracing::info!("Override webservice.token from env");
        }

        if let Ok(root) = std::env::var("APP_STORAGE_ROOT") {
            self.storage.root = root;
            tracing::info!("Override storage.root from env: {}", self.storage.root);
        }

        if let Ok(url) = std::env::var("APP_QUERY_URL") {
            self.query.url = url;
            tracing::info!("Override query.url from env: {}", self.query.url);
        }

        if let Ok(database) = std::env::var("APP_QUERY_DATABASE") {
            self.query.database = database;
            tracing::info!("Override query.database from env: {}", self.query.database);
        }

        if let Ok(table) = std::env::var("APP_QUERY_TABLE") {
            self.query.table = table;
            tracing::info!("Override query.table from env: {}", self.query.table);
        }

        if let Ok(location) = std::env::var("APP_QUERY_OUTPUT_LOCATION") {
            self.query.output_location = location;
            tracing::info!("Override query.output_location from env");
        }

        if let Ok(interval) = std::env::var("APP_QUERY_POLL_INTERVAL") {
            match parse_duration_to_millis(&interval) {
                Ok(val) => {
                    self.query.poll_interval_ms = val;
                    tracing::info!(
                        "Override query.poll_interval_ms from env: {}",
                        self.query.poll_interval_ms
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_QUERY_POLL_INTERVAL '{}': {} (keep {})",
                    interval,
                    e,
                    self.query.poll_interval_ms
                ),
            }
        }

        if let Ok(timeout) = std::env::var("APP_QUERY_TIMEOUT") {
            match parse_duration_to_millis(&timeout) {
                Ok(val) => {
                    self.query.timeout_secs = val / 1000;
                    tracing::info!("Override query.timeout_secs from env: {}", self.query.timeout_secs);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_QUERY_TIMEOUT '{}': {} (keep {})",
                    timeout,
                    e,
                    self.query.timeout_secs
                ),
            }
        }

        if let Ok(workers) = std::env::var("APP_AGGREGATION_WORKERS")
            && let Ok(workers) = workers.parse()
        {
            self.aggregation.workers = workers;
            tracing::info!("Override aggregation.workers from env: {}", self.aggregation.workers);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.webservice.url.is_empty() {
            anyhow::bail!("webservice.url cannot be empty");
        }
        if self.webservice.token.is_none() {
            tracing::warn!("No webservice token configured, metric submission will be rejected");
        }
        if self.aggregation.workers == 0 {
            anyhow::bail!("aggregation.workers must be > 0");
        }
        if self.query.poll_interval_ms == 0 {
            anyhow::bail!("query.poll_interval_ms must be > 0");
        }
        if self.query.timeout_secs == 0 {
            anyhow::bail!("query.timeout_secs must be > 0");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for WebserviceConfig {
    fn default() -> Self {
        Self { url: "http://localhost:8080/api".to_string(), token: None }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: "data/executions".to_string() }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8090".to_string(),
            database: "dockstore".to_string(),
            table: "executions".to_string(),
            output_location: "s3://dockstore-query-results/".to_string(),
            poll_interval_ms: 500,
            timeout_secs: 600,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,metrics_aggregator=debug".to_string(), file: None }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_millis(input: &str) -> Result<u64, String> {
    // Plain numbers are seconds
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val * 1000);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "ms" | "millis" => Ok(n),
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n * 1000),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60 * 1000),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60 * 1000),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

struct DurationVisitor {
    /// Numbers are taken as this many milliseconds per unit
    plain_number_millis: u64,
    /// Result is divided by this
    result_divisor: u64,
}

impl<'de> serde::de::Visitor<'de> for DurationVisitor {
    type Value = u64;
    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "a number or a string like '500ms', '30s', '5m'")
    }
    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v * self.plain_number_millis / self.result_divisor)
    }
    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if v >= 0 {
            self.visit_u64(v as u64)
        } else {
            Err(E::custom("negative not allowed"))
        }
    }
    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        parse_duration_to_millis(v).map(|ms| ms / self.result_divisor).map_err(E::custom)
    }
}

// Custom serde deserializers to support numeric or human-friendly string values
fn deserialize_duration_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor { plain_number_millis: 1, result_divisor: 1 })
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor { plain_number_millis: 1000, result_divisor: 1000 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_to_millis() {
        assert_eq!(parse_duration_to_millis("30").unwrap(), 30_000);
        assert_eq!(parse_duration_to_millis("500ms").unwrap(), 500);
        assert_eq!(parse_duration_to_millis("2m").unwrap(), 120_000);
        assert!(parse_duration_to_millis("10 parsecs").is_err());
    }

    #[test]
    fn test_config_from_toml_with_friendly_durations() {
        let config: Config = toml::from_str(
            r#"
            [webservice]
            url = "https://example.org/api"
            token = "secret"

            [query]
            poll_interval_ms = "250ms"
            timeout_secs = "5m"

            [aggregation]
            workers = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.query.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.query.timeout(), Duration::from_secs(300));
        assert_eq!(config.aggregation.workers, 4);
        assert_eq!(config.query.table, "executions");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_numeric_durations() {
        let config: Config = toml::from_str(
            r#"
            [query]
            poll_interval_ms = 100
            timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.query.poll_interval_ms, 100);
        assert_eq!(config.query.timeout_secs, 30);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.aggregation.workers = 0;
        assert!(config.validate().is_err());
    }
}
