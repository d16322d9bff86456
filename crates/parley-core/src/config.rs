//! Configuration resolution for the Parley relay.
//!
//! Implements layered config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/parley/relay.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (applied by the binary, highest priority)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Origin of the web client the relay ships alongside.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

/// Origin wildcard that disables the handshake origin check.
pub const ANY_ORIGIN: &str = "*";

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub addr: SocketAddr,
    /// Origins allowed to open a relay connection. `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Largest accepted client frame, in bytes.
    pub max_payload_bytes: usize,
    /// Frames buffered per connection before deliveries to it are dropped.
    pub outbound_queue: usize,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 4001)),
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            max_payload_bytes: 64 * 1024, // 64 KiB
            outbound_queue: 64,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub const fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == ANY_ORIGIN)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.allowed_origins.is_empty() {
            return Err(Error::Config(
                "allowed_origins must list at least one origin (use \"*\" for any)".into(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(Error::Config("max_payload_bytes must be positive".into()));
        }
        if self.outbound_queue == 0 {
            return Err(Error::Config("outbound_queue must be positive".into()));
        }
        if self.ping_interval_secs == 0 || self.pong_timeout_secs == 0 {
            return Err(Error::Config(
                "ping_interval_secs and pong_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A config file layer. Only the keys present in the file override the
/// layer below it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    addr: Option<SocketAddr>,
    allowed_origins: Option<Vec<String>>,
    max_payload_bytes: Option<usize>,
    outbound_queue: Option<usize>,
    ping_interval_secs: Option<u64>,
    pong_timeout_secs: Option<u64>,
    log_level: Option<String>,
}

/// Load configuration with layered resolution.
///
/// A missing global file is skipped; a missing `explicit` file is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<RelayConfig> {
    let mut config = RelayConfig::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_layer(&mut config, load_config_file(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        merge_layer(&mut config, load_config_file(path)?);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".parley").join("relay.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/parley/relay.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("parley").join("relay.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_layer(base: &mut RelayConfig, layer: ConfigLayer) {
    if let Some(addr) = layer.addr {
        base.addr = addr;
    }
    if let Some(origins) = layer.allowed_origins {
        base.allowed_origins = origins;
    }
    if let Some(n) = layer.max_payload_bytes {
        base.max_payload_bytes = n;
    }
    if let Some(n) = layer.outbound_queue {
        base.outbound_queue = n;
    }
    if let Some(n) = layer.ping_interval_secs {
        base.ping_interval_secs = n;
    }
    if let Some(n) = layer.pong_timeout_secs {
        base.pong_timeout_secs = n;
    }
    if let Some(level) = layer.log_level {
        base.log_level = level;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.parse()
        .map_err(|_| Error::Config(format!("Invalid value for {key}: {val:?}")))
}

fn apply_env_overrides(
    config: &mut RelayConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(val) = env("PARLEY_ADDR") {
        config.addr = parse_env("PARLEY_ADDR", &val)?;
    }
    if let Some(val) = env("PARLEY_ALLOWED_ORIGIN") {
        config.allowed_origins = split_origins(&val);
    }
    if let Some(val) = env("PARLEY_MAX_PAYLOAD_BYTES") {
        config.max_payload_bytes = parse_env("PARLEY_MAX_PAYLOAD_BYTES", &val)?;
    }
    if let Some(val) = env("PARLEY_LOG_LEVEL") {
        config.log_level = val;
    }
    Ok(())
}

/// Split a comma-separated origin list, dropping blanks.
pub fn split_origins(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
