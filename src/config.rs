//! Configuration loading and validation.
//!
//! `config.toml` is human-owned and read at startup. Every section has
//! defaults, so a missing file yields a usable configuration that delivers
//! through the console transport. A handful of `MAILCAST_*` environment
//! variables override file values.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use crate::credentials::Credentials;
use crate::transport::console::ConsoleTransport;
use crate::transport::relay::{HttpRelayTransport, RelaySettings};
use crate::transport::{FailoverTransport, MailTransport};

/// Top-level human-owned configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database location.
    pub database: DatabaseConfig,

    /// System sender identity.
    pub sender: SenderConfig,

    /// Ordered delivery channels.
    pub transport: TransportConfig,

    /// Dispatch worker pool.
    pub dispatch: DispatchConfig,
}

/// SQLite database location.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file. Relative paths resolve against the config directory;
    /// unset means `mailcast.db` there.
    pub path: Option<PathBuf>,
}

/// System sender identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Address every message is sent from.
    pub address: String,

    /// Display name used when neither the campaign nor the tenant has one.
    pub default_name: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            address: default_sender_address(),
            default_name: default_sender_name(),
        }
    }
}

/// Delivery channels, primary first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Relay channels in failover order. Empty means console delivery.
    pub channels: Vec<ChannelConfig>,
}

/// One HTTP mail relay channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Name reported in send events.
    pub name: String,

    /// Relay endpoint URL.
    pub endpoint: String,

    /// Environment variable (or `.env` key) holding the relay API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Dispatch worker pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum recipients in flight at once. `1` sends sequentially.
    pub concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

// Default value functions for serde

fn default_sender_address() -> String {
    "no-reply@localhost".to_owned()
}
fn default_sender_name() -> String {
    "Mailcast".to_owned()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

impl Config {
    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides (env > config file > defaults).
    ///
    /// Takes a resolver so tests need not touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("MAILCAST_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("MAILCAST_SENDER_ADDRESS") {
            self.sender.address = v;
        }
        if let Some(v) = env("MAILCAST_CONCURRENCY") {
            match v.parse() {
                Ok(n) => self.dispatch.concurrency = n,
                Err(_) => warn!(
                    var = "MAILCAST_CONCURRENCY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Database file, resolved against `base_dir` when relative.
    pub fn database_path(&self, base_dir: &Path) -> PathBuf {
        match &self.database.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => base_dir.join(p),
            None => base_dir.join("mailcast.db"),
        }
    }
}

/// Load the human-owned config from a TOML file.
///
/// A missing file yields defaults. Environment overrides are applied.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            info!(path = %path.display(), "loading config from file");
            Config::from_toml(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            ))
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.mailcast/`).
///
/// `MAILCAST_HOME` takes precedence when set.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    if let Some(home) = std::env::var_os("MAILCAST_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".mailcast"))
}

/// Files and directories under the config directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Config directory root.
    pub root: PathBuf,
    /// `config.toml`.
    pub config_toml: PathBuf,
    /// `.env` credentials.
    pub env_file: PathBuf,
    /// Log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Paths rooted at `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            config_toml: root.join("config.toml"),
            env_file: root.join(".env"),
            logs_dir: root.join("logs"),
        }
    }
}

/// Resolve runtime paths under [`config_dir`].
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    Ok(RuntimePaths::under(&config_dir()?))
}

/// Build the failover transport from configured channels.
///
/// With no channels configured the console transport is used, which logs
/// messages and reports them as mock deliveries.
///
/// # Errors
///
/// Returns an error if a channel endpoint is invalid or its API key
/// variable is named but not set.
pub fn build_transport(
    config: &Config,
    credentials: &Credentials,
) -> anyhow::Result<FailoverTransport> {
    if config.transport.channels.is_empty() {
        warn!("no transport channels configured, messages will only be logged");
        return Ok(FailoverTransport::single(Arc::new(ConsoleTransport)));
    }

    let mut channels: Vec<Arc<dyn MailTransport>> = Vec::new();
    for channel in &config.transport.channels {
        let endpoint = url::Url::parse(&channel.endpoint).with_context(|| {
            format!("invalid endpoint for channel {}: {}", channel.name, channel.endpoint)
        })?;
        let api_key = match &channel.api_key_env {
            Some(var) => Some(
                credentials
                    .get(var)
                    .map(str::to_owned)
                    .or_else(|| std::env::var(var).ok())
                    .ok_or_else(|| {
                        anyhow::anyhow!("channel {} needs credential {var}", channel.name)
                    })?,
            ),
            None => None,
        };
        let transport = HttpRelayTransport::new(RelaySettings {
            name: channel.name.clone(),
            endpoint,
            api_key,
            sender_address: config.sender.address.clone(),
            timeout: Duration::from_secs(channel.timeout_secs),
        })
        .with_context(|| format!("failed to build channel {}", channel.name))?;
        channels.push(Arc::new(transport));
    }

    Ok(FailoverTransport::new(channels)?)
}
