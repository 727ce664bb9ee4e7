//! ---
//! uev_section: "01-core-functionality"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Shared primitives and utilities for the events client."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::time::ClockMode;

/// Largest text payload representable by the 16-bit length field.
pub const MAX_TEXT_PAYLOAD: usize = u16::MAX as usize;

/// Largest payload an IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

fn default_soft_remote() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 12345))
}

fn default_soft_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 12344))
}

fn default_real_remote() -> String {
    "127.0.0.1:5556".to_owned()
}

fn default_ack_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_sync_line() -> u8 {
    3
}

fn default_groups() -> u32 {
    10
}

fn default_intergroup_delay() -> Duration {
    Duration::from_millis(750)
}

fn default_soft_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_text_payload() -> String {
    "He who laughs last laughs ... you can't laugh again.".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// How text annotations are framed on the soft channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextFraming {
    /// `[kind][timestamp][u16 be length][payload]`.
    #[default]
    LengthPrefixed,
    /// `[kind][timestamp][payload]`, the datagram boundary ends the payload.
    DatagramBounded,
}

impl TextFraming {
    /// Bytes in front of the payload.
    pub const fn header_len(self) -> usize {
        match self {
            TextFraming::LengthPrefixed => 11,
            TextFraming::DatagramBounded => 9,
        }
    }

    /// Largest text payload that still fits in a single datagram.
    pub const fn max_payload(self) -> usize {
        let datagram_limit = MAX_DATAGRAM_LEN - self.header_len();
        if MAX_TEXT_PAYLOAD < datagram_limit {
            MAX_TEXT_PAYLOAD
        } else {
            datagram_limit
        }
    }
}

impl std::str::FromStr for TextFraming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "length-prefixed" => Ok(TextFraming::LengthPrefixed),
            "datagram-bounded" => Ok(TextFraming::DatagramBounded),
            other => Err(format!("unknown text framing: {}", other)),
        }
    }
}

/// Primary configuration object for an events client session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub soft: SoftConfig,
    #[serde(default)]
    pub real: RealConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "UEV_CONFIG";

    /// Load configuration from disk, respecting the `UEV_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Unlike a daemon the client is usable without any file: when neither
    /// `UEV_CONFIG` nor a candidate exists the built-in defaults are used.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found, using defaults");
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.soft.validate()?;
        self.session.validate()?;
        let limit = self.soft.text_framing.max_payload();
        if self.session.text_payload.len() > limit {
            return Err(anyhow!(
                "session.text_payload is {} bytes, a {:?} text frame fits at most {}",
                self.session.text_payload.len(),
                self.soft.text_framing,
                limit
            ));
        }
        if self.real.remote_addr.trim().is_empty() {
            return Err(anyhow!("real.remote_addr must not be empty"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Soft (datagram) channel settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftConfig {
    #[serde(default = "default_soft_remote")]
    pub remote_addr: SocketAddr,
    #[serde(default = "default_soft_bind")]
    pub local_bind_addr: SocketAddr,
    #[serde(default = "default_ack_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ack_timeout: Duration,
    #[serde(default)]
    pub text_framing: TextFraming,
}

impl Default for SoftConfig {
    fn default() -> Self {
        Self {
            remote_addr: default_soft_remote(),
            local_bind_addr: default_soft_bind(),
            ack_timeout: default_ack_timeout(),
            text_framing: TextFraming::default(),
        }
    }
}

impl SoftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout.is_zero() {
            return Err(anyhow!("soft.ack_timeout must be greater than zero"));
        }
        if self.remote_addr == self.local_bind_addr {
            return Err(anyhow!(
                "soft.remote_addr and soft.local_bind_addr are both {}",
                self.remote_addr
            ));
        }
        Ok(())
    }
}

/// Real (request/reply) channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealConfig {
    /// `host:port`, or a full `tcp://host:port` endpoint.
    #[serde(default = "default_real_remote")]
    pub remote_addr: String,
}

impl Default for RealConfig {
    fn default() -> Self {
        Self {
            remote_addr: default_real_remote(),
        }
    }
}

/// Parameters of the demonstration session driven by `uevctl run`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_sync_line")]
    pub sync_line: u8,
    #[serde(default)]
    pub extra_line: u8,
    #[serde(default = "default_groups")]
    pub groups: u32,
    #[serde(default = "default_intergroup_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub intergroup_delay: Duration,
    #[serde(default = "default_soft_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub soft_delay: Duration,
    #[serde(default = "default_text_payload")]
    pub text_payload: String,
    #[serde(default)]
    pub clock: ClockMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_line: default_sync_line(),
            extra_line: 0,
            groups: default_groups(),
            intergroup_delay: default_intergroup_delay(),
            soft_delay: default_soft_delay(),
            text_payload: default_text_payload(),
            clock: ClockMode::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.groups == 0 {
            return Err(anyhow!("session.groups must be at least 1"));
        }
        if self.text_payload.len() > MAX_TEXT_PAYLOAD {
            return Err(anyhow!(
                "session.text_payload is {} bytes, limit is {}",
                self.text_payload.len(),
                MAX_TEXT_PAYLOAD
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Disable the rolling file sink (stdout only).
    #[serde(default)]
    pub stdout_only: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            stdout_only: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn defaults_match_local_recorder_ports() {
        let config = AppConfig::default();
        assert_eq!(config.soft.remote_addr.port(), 12345);
        assert_eq!(config.soft.local_bind_addr.port(), 12344);
        assert_eq!(config.real.remote_addr, "127.0.0.1:5556");
        assert_eq!(config.session.sync_line, 3);
        assert_eq!(config.session.extra_line, 0);
        assert_eq!(config.soft.text_framing, TextFraming::LengthPrefixed);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = AppConfig::from_str(
            r#"
            [soft]
            remote_addr = "10.0.0.2:12345"
            ack_timeout = 250
            text_framing = "datagram-bounded"

            [session]
            sync_line = 7
            intergroup_delay = 100
            clock = "epoch"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.soft.remote_addr.to_string(), "10.0.0.2:12345");
        assert_eq!(config.soft.ack_timeout, Duration::from_millis(250));
        assert_eq!(config.soft.text_framing, TextFraming::DatagramBounded);
        assert_eq!(config.session.sync_line, 7);
        assert_eq!(config.session.intergroup_delay, Duration::from_millis(100));
        assert_eq!(config.session.clock, ClockMode::Epoch);
        assert_eq!(config.session.groups, 10);
    }

    #[test]
    fn rejects_zero_ack_timeout() {
        let err = AppConfig::from_str("[soft]\nack_timeout = 0\n").unwrap_err();
        assert!(err.to_string().contains("ack_timeout"));
    }

    #[test]
    fn rejects_oversized_text_payload() {
        let mut config = AppConfig::default();
        config.session.text_payload = "x".repeat(MAX_TEXT_PAYLOAD + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn text_payload_must_fit_one_datagram() {
        let mut config = AppConfig::default();
        config.session.text_payload = "x".repeat(65_497);
        assert!(config.session.validate().is_ok());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("text_payload"));

        config.session.text_payload = "x".repeat(TextFraming::LengthPrefixed.max_payload());
        config.validate().expect("largest length-prefixed payload");

        config.soft.text_framing = TextFraming::DatagramBounded;
        config.session.text_payload = "x".repeat(65_498);
        config.validate().expect("largest datagram-bounded payload");
        config.session.text_payload.push('x');
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_soft_loop_to_self() {
        let mut config = AppConfig::default();
        config.soft.remote_addr = config.soft.local_bind_addr;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("uev.toml");
        std::fs::write(&path, "[session]\ngroups = 2\n").expect("write config");

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).expect("load");
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.session.groups, 2);
    }

    #[test]
    fn text_framing_from_str() {
        assert_eq!(
            TextFraming::from_str("Length-Prefixed").unwrap(),
            TextFraming::LengthPrefixed
        );
        assert!(TextFraming::from_str("nul-terminated").is_err());
    }
}
