use std::path::PathBuf;

use chrono_tz::Tz;
use tracing::warn;

const PREFIX: &str = "SLOTGRID_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown time zone {0:?} in SLOTGRID_TIMEZONE")]
    TimeZone(String),
    #[error("both SLOTGRID_TLS_CERT and SLOTGRID_TLS_KEY must be set, or neither")]
    HalfTls,
}

/// Server settings, read from `SLOTGRID_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub timezone: Tz,
    pub catalog: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotgrid".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            timezone: Tz::UTC,
            catalog: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Keys are the full variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let timezone = match get("TIMEZONE") {
            Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::TimeZone(name))?,
            None => defaults.timezone,
        };
        let tls_cert = get("TLS_CERT").map(PathBuf::from);
        let tls_key = get("TLS_KEY").map(PathBuf::from);
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::HalfTls);
        }

        Ok(Self {
            port: parsed(&get, "PORT").unwrap_or(defaults.port),
            bind: get("BIND").unwrap_or(defaults.bind),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "MAX_CONNECTIONS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&get, "METRICS_PORT"),
            tls_cert,
            tls_key,
            timezone,
            catalog: get("CATALOG").map(PathBuf::from),
        })
    }

    /// Path of the schedule event log inside `data_dir`.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotgrid.wal")
    }
}

/// Parse a numeric setting, warning and falling back on garbage.
fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = get(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparsable {PREFIX}{name}={raw:?}");
            None
        }
    }
}
