//! Configuration Loading
//!
//! Defaults live on the config structs. A JSON document and then the
//! environment are layered on top:
//!
//! ```text
//!   ServerConfig::default()  ─▶  RDT_CONFIG json file  ─▶  env vars  ─▶  validate()
//! ```
//!
//! | Variable                    | Field                         |
//! |-----------------------------|-------------------------------|
//! | `RDT_BIND`                  | `bind_addr`                   |
//! | `RDT_TIMEOUT_MS`            | `arq.timeout`                 |
//! | `RDT_MAX_ATTEMPTS`          | `arq.max_attempts`            |
//! | `LOSS_PROBABILITY`          | `arq.loss_probability`        |
//! | `RDT_LOSS_SEED`             | `arq.loss_seed`               |
//! | `RDT_ROUND_TIMEOUT_SECS`    | `session.round_timeout`       |
//! | `RDT_MIN_PEERS`             | `session.min_peers`           |
//! | `RDT_RESTART_DELAY_SECS`    | `session.restart_delay`       |
//! | `RDT_ROUND_MODE`            | `session.round_mode`          |
//! | `RDT_SEED`                  | `session.seed`                |
//! | `RDT_CLEANUP_INTERVAL_SECS` | `cleanup_interval`            |
//! | `RDT_CONTACTS`              | `contacts` (`name;ip:port,…`) |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::game::session::RoundMode;
use crate::network::channel::ArqConfig;
use crate::network::login::{ContactBook, ContactError};
use crate::network::packet::HEADER_LEN;
use crate::network::server::ServerConfig;

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65_507;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Config document is not valid.
    #[error("Invalid config document: {0}")]
    Json(#[from] serde_json::Error),

    /// Environment variable could not be parsed.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// Contact list could not be parsed.
    #[error("Invalid contact list: {0}")]
    Contacts(#[from] ContactError),

    /// A setting is out of range.
    #[error("Invalid setting: {0}")]
    OutOfRange(String),
}

/// On-disk configuration. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Bind address.
    pub bind_addr: Option<SocketAddr>,
    /// ARQ timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// ARQ attempts per message.
    pub max_attempts: Option<u32>,
    /// Simulated loss probability.
    pub loss_probability: Option<f64>,
    /// Seed for the loss model.
    pub loss_seed: Option<u64>,
    /// Datagram ceiling in bytes.
    pub mtu: Option<usize>,
    /// Round timeout in seconds.
    pub round_timeout_secs: Option<u64>,
    /// Minimum peers.
    pub min_peers: Option<usize>,
    /// Restart delay in seconds.
    pub restart_delay_secs: Option<u64>,
    /// Round completion rule.
    pub round_mode: Option<RoundMode>,
    /// Grid side length.
    pub grid_size: Option<usize>,
    /// Session seed.
    pub seed: Option<u64>,
    /// Deadline check period in milliseconds.
    pub tick_interval_ms: Option<u64>,
    /// Peer task poll period in milliseconds.
    pub recv_poll_ms: Option<u64>,
    /// Login timeout in seconds.
    pub login_timeout_secs: Option<u64>,
    /// Idle timeout in seconds.
    pub idle_timeout_secs: Option<u64>,
    /// Idle sweep period in seconds.
    pub cleanup_interval_secs: Option<u64>,
    /// Contact entries, `name` or `name;ip:port`.
    pub contacts: Option<Vec<String>>,
}

impl ConfigFile {
    /// Apply the present fields to `config`.
    pub fn apply(self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        if let Some(v) = self.bind_addr {
            config.bind_addr = v;
        }
        if let Some(v) = self.timeout_ms {
            config.arq.timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.max_attempts {
            config.arq.max_attempts = v;
        }
        if let Some(v) = self.loss_probability {
            config.arq.loss_probability = v;
        }
        if let Some(v) = self.loss_seed {
            config.arq.loss_seed = Some(v);
        }
        if let Some(v) = self.mtu {
            config.arq.mtu = v;
        }
        if let Some(v) = self.round_timeout_secs {
            config.session.round_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.min_peers {
            config.session.min_peers = v;
        }
        if let Some(v) = self.restart_delay_secs {
            config.session.restart_delay = Duration::from_secs(v);
        }
        if let Some(v) = self.round_mode {
            config.session.round_mode = v;
        }
        if let Some(v) = self.grid_size {
            config.session.grid_size = v;
        }
        if let Some(v) = self.seed {
            config.session.seed = Some(v);
        }
        if let Some(v) = self.tick_interval_ms {
            config.tick_interval = Duration::from_millis(v);
        }
        if let Some(v) = self.recv_poll_ms {
            config.recv_poll = Duration::from_millis(v);
        }
        if let Some(v) = self.login_timeout_secs {
            config.login_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.idle_timeout_secs {
            config.idle_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.cleanup_interval_secs {
            config.cleanup_interval = Duration::from_secs(v);
        }
        if let Some(entries) = self.contacts {
            config.contacts = Some(ContactBook::parse(&entries.join("\n"))?);
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value })
}

impl ServerConfig {
    /// Defaults overlaid with a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let mut config = Self::default();
        file.apply(&mut config)?;
        Ok(config)
    }

    /// Defaults overlaid with a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env()
    }

    /// Overlay the process environment.
    pub fn overlay_env(self) -> Result<Self, ConfigError> {
        self.overlay_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay variables obtained from `lookup`.
    pub fn overlay_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("RDT_BIND") {
            self.bind_addr = parse_var("RDT_BIND", v)?;
        }
        if let Some(v) = lookup("RDT_TIMEOUT_MS") {
            self.arq.timeout = Duration::from_millis(parse_var("RDT_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("RDT_MAX_ATTEMPTS") {
            self.arq.max_attempts = parse_var("RDT_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("LOSS_PROBABILITY") {
            self.arq.loss_probability = parse_var("LOSS_PROBABILITY", v)?;
        }
        if let Some(v) = lookup("RDT_LOSS_SEED") {
            self.arq.loss_seed = Some(parse_var("RDT_LOSS_SEED", v)?);
        }
        if let Some(v) = lookup("RDT_ROUND_TIMEOUT_SECS") {
            self.session.round_timeout = Duration::from_secs(parse_var("RDT_ROUND_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = lookup("RDT_MIN_PEERS") {
            self.session.min_peers = parse_var("RDT_MIN_PEERS", v)?;
        }
        if let Some(v) = lookup("RDT_RESTART_DELAY_SECS") {
            self.session.restart_delay = Duration::from_secs(parse_var("RDT_RESTART_DELAY_SECS", v)?);
        }
        if let Some(v) = lookup("RDT_ROUND_MODE") {
            self.session.round_mode = parse_var("RDT_ROUND_MODE", v)?;
        }
        if let Some(v) = lookup("RDT_SEED") {
            self.session.seed = Some(parse_var("RDT_SEED", v)?);
        }
        if let Some(v) = lookup("RDT_CLEANUP_INTERVAL_SECS") {
            self.cleanup_interval = Duration::from_secs(parse_var("RDT_CLEANUP_INTERVAL_SECS", v)?);
        }
        if let Some(v) = lookup("RDT_CONTACTS") {
            self.contacts = Some(ContactBook::parse(&v)?);
        }
        Ok(self)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.arq.validate()?;

        if self.session.min_peers == 0 {
            return Err(ConfigError::OutOfRange("min_peers must be at least 1".into()));
        }
        if self.session.grid_size < 2 {
            return Err(ConfigError::OutOfRange("grid_size must be at least 2".into()));
        }
        for (name, period) in [
            ("tick_interval", self.tick_interval),
            ("recv_poll", self.recv_poll),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if period.is_zero() {
                return Err(ConfigError::OutOfRange(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

impl ArqConfig {
    /// Reject parameters the channel cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(ConfigError::OutOfRange(format!(
                "loss_probability must be within [0, 1], got {}",
                self.loss_probability
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::OutOfRange("max_attempts must be at least 1".into()));
        }
        if self.mtu <= HEADER_LEN || self.mtu > MAX_DATAGRAM {
            return Err(ConfigError::OutOfRange(format!(
                "mtu must be within ({HEADER_LEN}, {MAX_DATAGRAM}], got {}",
                self.mtu
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::OutOfRange("timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let config = ServerConfig::default()
            .overlay_env_with(env(&[
                ("RDT_BIND", "0.0.0.0:4000"),
                ("RDT_TIMEOUT_MS", "500"),
                ("LOSS_PROBABILITY", "0.25"),
                ("RDT_MIN_PEERS", "3"),
                ("RDT_ROUND_MODE", "first_to_act"),
                ("RDT_CONTACTS", "ana;127.0.0.1:5000,bia"),
            ]))
            .unwrap();

        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.arq.timeout, Duration::from_millis(500));
        assert_eq!(config.arq.loss_probability, 0.25);
        assert_eq!(config.session.min_peers, 3);
        assert_eq!(config.session.round_mode, RoundMode::FirstToAct);
        assert_eq!(config.contacts.unwrap().len(), 2);
        // Untouched fields keep their defaults.
        assert_eq!(config.arq.max_attempts, 10);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = ServerConfig::default()
            .overlay_env_with(env(&[("RDT_MAX_ATTEMPTS", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "RDT_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_json_overlay() {
        let config = ServerConfig::from_json_str(
            r#"{ "round_timeout_secs": 3, "round_mode": "simultaneous", "contacts": ["ana", "bia;127.0.0.1:7000"] }"#,
        )
        .unwrap();

        assert_eq!(config.session.round_timeout, Duration::from_secs(3));
        assert_eq!(config.session.round_mode, RoundMode::Simultaneous);
        assert!(config.contacts.unwrap().contains("bia"));
    }

    #[test]
    fn test_cleanup_interval_is_configurable() {
        let config = ServerConfig::from_json_str(r#"{ "cleanup_interval_secs": 7 }"#).unwrap();
        assert_eq!(config.cleanup_interval, Duration::from_secs(7));

        let config = config
            .overlay_env_with(env(&[("RDT_CLEANUP_INTERVAL_SECS", "2")]))
            .unwrap();
        assert_eq!(config.cleanup_interval, Duration::from_secs(2));

        let config = ServerConfig::from_json_str(r#"{ "cleanup_interval_secs": 0 }"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_rejects_unknown_keys() {
        let err = ServerConfig::from_json_str(r#"{ "roundtimeout": 3 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::from_json_file("/nonexistent/rdt.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        config.arq.loss_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.arq.mtu = HEADER_LEN;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.session.min_peers = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.arq.loss_probability = f64::NAN;
        assert!(config.validate().is_err());
    }
}
