use anyhow::{Context, anyhow, bail};
use std::collections::HashSet;
use std::fmt::Display;
use std::io;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_NODES: &str = "1,2:2,3";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub address: u8,
    /// Reported battery value is divided by this before use
    pub vbat_divisor: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub master: SerialConfig,
    pub pressure: Option<SerialConfig>,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub nodes: Vec<NodeConfig>,
    pub database_uri: Option<String>,
    pub log_filter: String,
}

impl GatewayConfig {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenv_loaded(dotenvy::dotenv().map(|_| ()))?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout = Duration::from_millis(parse_or(&lookup, "SERIAL_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?);

        let master = SerialConfig {
            port: lookup("SERIAL_PORT").ok_or_else(|| anyhow!("SERIAL_PORT is not set"))?,
            baud_rate: parse_or(&lookup, "BAUD_RATE", DEFAULT_BAUD_RATE)?,
            timeout,
        };

        let pressure = match lookup("PRESSURE_PORT") {
            Some(port) => Some(SerialConfig {
                port,
                baud_rate: parse_or(&lookup, "PRESSURE_BAUD_RATE", DEFAULT_BAUD_RATE)?,
                timeout,
            }),
            None => None,
        };

        let poll_interval =
            Duration::from_secs(parse_or(&lookup, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?);
        if poll_interval.is_zero() {
            bail!("POLL_INTERVAL_SECS must be positive");
        }

        let nodes = parse_nodes(&lookup("NODES").unwrap_or_else(|| DEFAULT_NODES.to_string()))?;

        Ok(Self {
            master,
            pressure,
            poll_interval,
            max_retries: parse_or(&lookup, "MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            nodes,
            database_uri: lookup("DATABASE_URI").filter(|uri| !uri.is_empty()),
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }
}

/// A missing `.env` is fine, the variables may come from the environment.
/// A broken one is not.
fn dotenv_loaded(result: Result<(), dotenvy::Error>) -> Result<(), anyhow::Error> {
    match result {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!("Failed to load .env: {e}")),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, anyhow::Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {key} `{raw}`: {e}")),
        None => Ok(default),
    }
}

/// Parses `1,2:2,3`: node addresses with an optional battery divisor.
fn parse_nodes(raw: &str) -> Result<Vec<NodeConfig>, anyhow::Error> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (address, divisor) = entry.split_once(':').unwrap_or((entry, "1"));
        let address: u8 = address
            .trim()
            .parse()
            .with_context(|| format!("Invalid node address in `{entry}`"))?;
        let vbat_divisor: i16 = divisor
            .trim()
            .parse()
            .with_context(|| format!("Invalid battery divisor in `{entry}`"))?;
        if vbat_divisor <= 0 {
            bail!("Battery divisor must be positive in `{entry}`");
        }
        if !seen.insert(address) {
            bail!("Node {address} listed twice");
        }
        nodes.push(NodeConfig {
            address,
            vbat_divisor,
        });
    }

    if nodes.is_empty() {
        bail!("NODES lists no nodes");
    }
    Ok(nodes)
}
