use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use crate::constants::*;
use crate::error::{IngestError, Result};

/// Everything the ingester needs, passed explicitly to whoever builds the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub pipeline: PipelineConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "my_postgres".to_string(),
            port: 5432,
            name: "mydatabase".to_string(),
            user: "myuser".to_string(),
            password: "mypassword".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue the deliveries come from; recorded on every delivery span.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Bound on connection acquisition and on every transaction.
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_dir: String,
    /// Prometheus exporter port; no exporter when unset.
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            metrics_port: None,
        }
    }
}

/// Settings the orchestrator runs with, already checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub batch_size: NonZeroUsize,
    pub timeout: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl IngestConfig {
    /// Defaults, then the TOML file if given, then environment (`.env` included).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `GEO_INGEST_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GEO_INGEST_DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("GEO_INGEST_DB_PORT") {
            self.database.port = parse_var("GEO_INGEST_DB_PORT", &v)?;
        }
        if let Some(v) = lookup("GEO_INGEST_DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = lookup("GEO_INGEST_DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("GEO_INGEST_DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("GEO_INGEST_POOL_SIZE") {
            self.database.pool_size = parse_var("GEO_INGEST_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("GEO_INGEST_QUEUE_URL") {
            self.queue.url = v;
        }
        if let Some(v) = lookup("GEO_INGEST_BATCH_SIZE") {
            self.pipeline.batch_size = parse_var("GEO_INGEST_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("GEO_INGEST_TIMEOUT_SECS") {
            self.pipeline.timeout_secs = parse_var("GEO_INGEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("GEO_INGEST_LOG_DIR") {
            self.observability.log_dir = v;
        }
        if let Some(v) = lookup("GEO_INGEST_METRICS_PORT") {
            self.observability.metrics_port = Some(parse_var("GEO_INGEST_METRICS_PORT", &v)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let batch_size = self.pipeline.batch_size;
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(IngestError::Config(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(IngestError::Config("timeout_secs must be at least 1".to_string()));
        }
        if self.database.pool_size == 0 {
            return Err(IngestError::Config("pool_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<IngestSettings> {
        self.validate()?;
        let batch_size = NonZeroUsize::new(self.pipeline.batch_size)
            .ok_or_else(|| IngestError::Config("batch_size must be at least 1".to_string()))?;
        Ok(IngestSettings {
            batch_size,
            timeout: self.timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::Config(format!("{key} has an invalid value: '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_deployment() {
        let config = IngestConfig::default();
        assert_eq!(config.pipeline.batch_size, 500);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.name, "mydatabase");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_values() {
        let mut config = IngestConfig::default();
        config
            .apply_overrides(lookup(&[
                ("GEO_INGEST_DB_HOST", "localhost"),
                ("GEO_INGEST_DB_PORT", "6543"),
                ("GEO_INGEST_BATCH_SIZE", "250"),
                ("GEO_INGEST_QUEUE_URL", "http://localhost:4566/000000000000/my-queue"),
                ("GEO_INGEST_METRICS_PORT", "9898"),
            ]))
            .unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.pipeline.batch_size, 250);
        assert_eq!(config.observability.metrics_port, Some(9898));
        assert_eq!(config.settings().unwrap().batch_size.get(), 250);
    }

    #[test]
    fn unparsable_override_is_a_config_error() {
        let mut config = IngestConfig::default();
        let err = config
            .apply_overrides(lookup(&[("GEO_INGEST_DB_PORT", "fivefourthreetwo")]))
            .unwrap_err();
        assert!(err.to_string().contains("GEO_INGEST_DB_PORT"));
    }

    #[test]
    fn batch_size_bounds() {
        let mut config = IngestConfig::default();
        config.pipeline.batch_size = 0;
        assert!(config.validate().is_err());
        config.pipeline.batch_size = MAX_BATCH_SIZE + 1;
        assert!(config.validate().is_err());
        config.pipeline.batch_size = MAX_BATCH_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn password_is_not_printed() {
        let rendered = format!("{:?}", IngestConfig::default());
        assert!(!rendered.contains("mypassword"));
    }

    #[test]
    fn partial_toml_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[database]\nhost = \"db.internal\"\n\n[pipeline]\nbatch_size = 100"
        )
        .unwrap();
        let config = IngestConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.pipeline.batch_size, 100);
        assert_eq!(config.pipeline.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }
}
