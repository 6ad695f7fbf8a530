use std::fmt;
use std::path::PathBuf;

const PREFIX: &str = "FLEETBOOK_";

/// Server settings, read from `FLEETBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub admin_password: String,
    pub operator_password: String,
    /// Shared by every client login.
    pub client_password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: String,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `lookup` gets the full variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(&format!("{PREFIX}{key}"));
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            bind: string("BIND", "0.0.0.0"),
            port: parse(&get, "PORT")?.unwrap_or(5433),
            data_dir: PathBuf::from(string("DATA_DIR", "./data")),
            admin_password: string("ADMIN_PASSWORD", "admin"),
            operator_password: string("OPERATOR_PASSWORD", "operator"),
            client_password: string("CLIENT_PASSWORD", "client"),
            max_connections: parse(&get, "MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parse(&get, "COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parse(&get, "METRICS_PORT")?,
            tls_cert: get("TLS_CERT"),
            tls_key: get("TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleetbook.wal")
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| ConfigError {
            var: format!("{PREFIX}{key}"),
            value,
        }),
    }
}
