//! Daemon configuration from the environment.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_STATUS_URL: &str = "http://127.0.0.1:7860";
const DEFAULT_API_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7786));
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the form-status service. Polls go to
    /// `{status_url}/api/status?slot=<id>`.
    pub status_url: String,

    /// Time between polls on each channel.
    pub poll_interval: Duration,

    /// Upper bound for a single status request. The poller further
    /// clamps this below `poll_interval`.
    pub request_timeout: Duration,

    /// Bind address of the local control API.
    pub api_addr: SocketAddr,

    /// Directory for persisted state and imported alarm sounds.
    pub data_dir: PathBuf,

    /// Slot to monitor at startup. When unset, the persisted selection
    /// from a previous run is resumed.
    pub slot: Option<String>,

    /// Whether the interactive channel starts alongside the background
    /// channel at startup.
    pub interactive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_url: DEFAULT_STATUS_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            api_addr: DEFAULT_API_ADDR,
            data_dir: default_data_dir(),
            slot: None,
            interactive: true,
        }
    }
}

impl Config {
    /// Build configuration from `FORMWATCH_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("FORMWATCH_STATUS_URL") {
            config.status_url = url.trim_end_matches('/').to_string();
        }

        if let Some(value) = lookup("FORMWATCH_POLL_INTERVAL_SECS") {
            let secs: u64 = parse("FORMWATCH_POLL_INTERVAL_SECS", &value)?;
            if secs == 0 {
                return Err(Error::Config(
                    "FORMWATCH_POLL_INTERVAL_SECS must be greater than zero".into(),
                ));
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(value) = lookup("FORMWATCH_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse("FORMWATCH_REQUEST_TIMEOUT_SECS", &value)?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup("FORMWATCH_API_ADDR") {
            config.api_addr = parse("FORMWATCH_API_ADDR", &value)?;
        }

        if let Some(dir) = lookup("FORMWATCH_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.slot = lookup("FORMWATCH_SLOT").filter(|s| !s.is_empty());

        if let Some(value) = lookup("FORMWATCH_INTERACTIVE") {
            config.interactive = parse("FORMWATCH_INTERACTIVE", &value)?;
        }

        Ok(config)
    }

    /// Path of the key-value state file.
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    /// Directory holding imported alarm sounds.
    pub fn sounds_dir(&self) -> PathBuf {
        self.data_dir.join("sounds")
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("formwatch")
}
