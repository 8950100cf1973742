use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::LedgerSettings;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Server settings, read from `SEATLEDGER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login names granted the admin role.
    pub admins: HashSet<String>,
    pub max_connections: usize,
    /// WAL appends since the last rewrite before the compactor kicks in.
    pub compact_threshold: u64,
    pub lock_wait: Duration,
    pub max_attempts: u32,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        let ledger = LedgerSettings::default();
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "seatledger".into(),
            admins: HashSet::new(),
            max_connections: 256,
            compact_threshold: 1000,
            lock_wait: ledger.lock_wait,
            max_attempts: ledger.max_attempts,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Unset or empty variables keep their defaults; malformed numbers are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(v) = parse(&get, "SEATLEDGER_PORT")? {
            config.port = v;
        }
        if let Some(v) = get("SEATLEDGER_BIND") {
            config.bind = v;
        }
        if let Some(v) = get("SEATLEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SEATLEDGER_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = get("SEATLEDGER_ADMINS") {
            config.admins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = parse(&get, "SEATLEDGER_MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = parse(&get, "SEATLEDGER_COMPACT_THRESHOLD")? {
            config.compact_threshold = v;
        }
        if let Some(ms) = parse::<u64>(&get, "SEATLEDGER_LOCK_WAIT_MS")? {
            config.lock_wait = Duration::from_millis(ms);
        }
        if let Some(v) = parse::<u32>(&get, "SEATLEDGER_MAX_ATTEMPTS")? {
            if v == 0 {
                return Err(ConfigError::Invalid {
                    var: "SEATLEDGER_MAX_ATTEMPTS",
                    value: v.to_string(),
                });
            }
            config.max_attempts = v;
        }
        config.tls_cert = get("SEATLEDGER_TLS_CERT");
        config.tls_key = get("SEATLEDGER_TLS_KEY");
        config.metrics_port = parse(&get, "SEATLEDGER_METRICS_PORT")?;

        Ok(config)
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            lock_wait: self.lock_wait,
            max_attempts: self.max_attempts,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("seatledger.wal")
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
