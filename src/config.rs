use crate::types::{PipelineError, Result};
use std::env;
use std::time::Duration;

/// Tunables for the pipeline core. `Default` matches how the binary runs
/// with nothing configured; `from_env` overrides individual knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Items pulled from the store per processing pass.
    pub batch_size: usize,
    /// Upper bound on items processed in one cycle; bounds cycle duration.
    pub cycle_item_cap: usize,
    /// Concurrent summarization workers within a cycle.
    pub worker_count: usize,
    /// Summarization attempts per item before it is marked failed.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Timeout for a single source adapter fetch.
    pub fetch_timeout: Duration,
    /// Timeout for a single summarizer call.
    pub summarize_timeout: Duration,
    /// When false, a cycle with zero processed items reports `EmptyDigest`.
    pub allow_empty_digest: bool,
    /// Age past which an unfinished cycle is treated as crashed and its
    /// single-flight gate reclaimed by the next trigger.
    pub stale_cycle_timeout: Duration,
    pub database_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            cycle_item_cap: 200,
            worker_count: 4,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
            summarize_timeout: Duration::from_secs(60),
            allow_empty_digest: true,
            stale_cycle_timeout: Duration::from_secs(3600),
            database_url: "sqlite://ai_news_digest.db?mode=rwc".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset. Malformed values are configuration errors rather
    /// than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(v) = read_env("DIGEST_BATCH_SIZE")? {
            config.batch_size = parse_positive("DIGEST_BATCH_SIZE", &v)?;
        }
        if let Some(v) = read_env("DIGEST_CYCLE_ITEM_CAP")? {
            config.cycle_item_cap = parse_positive("DIGEST_CYCLE_ITEM_CAP", &v)?;
        }
        if let Some(v) = read_env("DIGEST_WORKER_COUNT")? {
            config.worker_count = parse_positive("DIGEST_WORKER_COUNT", &v)?;
        }
        if let Some(v) = read_env("DIGEST_MAX_ATTEMPTS")? {
            config.max_attempts = parse_positive("DIGEST_MAX_ATTEMPTS", &v)? as u32;
        }
        if let Some(v) = read_env("DIGEST_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(parse_positive("DIGEST_FETCH_TIMEOUT_SECS", &v)? as u64);
        }
        if let Some(v) = read_env("DIGEST_SUMMARIZE_TIMEOUT_SECS")? {
            config.summarize_timeout =
                Duration::from_secs(parse_positive("DIGEST_SUMMARIZE_TIMEOUT_SECS", &v)? as u64);
        }
        if let Some(v) = read_env("DIGEST_STALE_CYCLE_TIMEOUT_SECS")? {
            config.stale_cycle_timeout =
                Duration::from_secs(parse_positive("DIGEST_STALE_CYCLE_TIMEOUT_SECS", &v)? as u64);
        }
        if let Some(v) = read_env("DIGEST_ALLOW_EMPTY")? {
            config.allow_empty_digest = match v.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(PipelineError::Config(format!(
                        "DIGEST_ALLOW_EMPTY: expected boolean, got '{}'",
                        other
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be positive".into()));
        }
        if self.worker_count == 0 {
            return Err(PipelineError::Config("worker_count must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::Config("max_attempts must be positive".into()));
        }
        if self.database_url.is_empty() {
            return Err(PipelineError::Config("database_url must be set".into()));
        }
        Ok(())
    }
}

fn read_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(v) if v.is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(PipelineError::Config(format!("{}: {}", key, e))),
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    let n: usize = value
        .parse()
        .map_err(|_| PipelineError::Config(format!("{}: expected integer, got '{}'", key, value)))?;
    if n == 0 {
        return Err(PipelineError::Config(format!("{} must be positive", key)));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }
}
