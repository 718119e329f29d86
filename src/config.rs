use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Runtime settings, read from `DAYBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    pub replenish_interval: Duration,
    pub request_timeout: Duration,
    /// JSON array of `{ "name", "capacity" }` loaded into an empty store.
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            replenish_interval: Duration::from_secs(3600),
            request_timeout: Duration::from_millis(5000),
            seed_file: None,
        }
    }
}

fn parse<T>(var: &'static str, lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
        var,
        reason: e.to_string(),
        value,
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let replenish_secs: Option<u64> = parse("DAYBOOK_REPLENISH_INTERVAL_SECS", &lookup)?;
        if replenish_secs == Some(0) {
            return Err(ConfigError {
                var: "DAYBOOK_REPLENISH_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }
        let timeout_ms: Option<u64> = parse("DAYBOOK_REQUEST_TIMEOUT_MS", &lookup)?;

        Ok(Config {
            bind: lookup("DAYBOOK_BIND").unwrap_or(defaults.bind),
            port: parse("DAYBOOK_PORT", &lookup)?.unwrap_or(defaults.port),
            data_dir: lookup("DAYBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parse("DAYBOOK_METRICS_PORT", &lookup)?,
            compact_threshold: parse("DAYBOOK_COMPACT_THRESHOLD", &lookup)?
                .unwrap_or(defaults.compact_threshold),
            replenish_interval: replenish_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.replenish_interval),
            request_timeout: timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            seed_file: lookup("DAYBOOK_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("daybook.wal")
    }
}
