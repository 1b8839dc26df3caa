//! Multiplexer layout.
//!
//! Loaded from a JSON document such as:
//!
//! ```json
//! {
//!   "channels": [
//!     { "type": "tcp", "host": "192.168.1.10", "port": 10110, "sentenceFilters": ["~GSV"] }
//!   ],
//!   "forwarders": [{ "type": "tcp", "port": 10111 }, { "type": "console" }],
//!   "computers": [{ "type": "derived", "prefix": "OS", "currentWindows": [600, 3600] }],
//!   "cache": { "bspFactor": 1.05 },
//!   "admin": { "bind": "0.0.0.0:9999" }
//! }
//! ```

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nmea_core::config::load_json;
use nmea_core::{CacheSettings, ConfigError};
use nmea_protocol::TalkerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::SentenceFilter;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "nmea.mux.json";

/// Complete multiplexer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MuxConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelConfig>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forwarders: Vec<ForwarderConfig>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub computers: Vec<ComputerConfig>,

    pub cache: CacheSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminConfig>,
}

/// An input channel and the filters applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(flatten)]
    pub kind: ChannelKind,

    #[serde(flatten)]
    pub filter: SentenceFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelKind {
    /// Replay of a recorded log.
    #[serde(rename_all = "camelCase")]
    File {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pause_ms: Option<u64>,
        #[serde(default, rename = "loop")]
        looping: bool,
    },

    /// Remote TCP server.
    Tcp { host: String, port: u16 },

    /// Constructor registered on the factory under `tag`.
    Custom {
        tag: String,
        #[serde(default)]
        params: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ForwarderConfig {
    Console,

    File {
        path: PathBuf,
        #[serde(default)]
        append: bool,
    },

    /// Serve every sentence to connected TCP clients.
    Tcp { port: u16 },

    Custom {
        tag: String,
        #[serde(default)]
        params: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ComputerConfig {
    /// True wind and current computer.
    #[serde(rename_all = "camelCase")]
    Derived {
        /// Talker id of the synthesized sentences.
        prefix: String,

        /// Current estimation windows, in seconds.
        #[serde(default = "default_current_windows")]
        current_windows: Vec<u64>,

        /// Share of a window that must be covered before it reports.
        #[serde(default = "default_min_span_fraction")]
        min_span_fraction: f64,

        #[serde(default = "default_tick_period_ms")]
        tick_period_ms: u64,
    },

    Custom {
        tag: String,
        #[serde(default)]
        params: Value,
    },
}

fn default_current_windows() -> Vec<u64> {
    vec![600, 3600]
}

fn default_min_span_fraction() -> f64 {
    0.5
}

fn default_tick_period_ms() -> u64 {
    1000
}

/// Administrative HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    #[serde(default = "default_admin_bind")]
    pub bind: String,
}

fn default_admin_bind() -> String {
    "0.0.0.0:9999".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind: default_admin_bind(),
        }
    }
}

impl AdminConfig {
    pub fn address(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::InvalidData(format!("admin bind '{}': {}", self.bind, e)))
    }
}

impl ComputerConfig {
    pub fn windows(current_windows: &[u64]) -> Vec<Duration> {
        current_windows
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }
}

impl MuxConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: MuxConfig = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot be instantiated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;

        for channel in &self.channels {
            match &channel.kind {
                ChannelKind::File { path, .. } if path.as_os_str().is_empty() => {
                    return Err(invalid("file channel needs a path"));
                }
                ChannelKind::Tcp { host, port } if host.is_empty() || *port == 0 => {
                    return Err(invalid(format!("tcp channel {}:{} is incomplete", host, port)));
                }
                ChannelKind::Custom { tag, .. } if tag.is_empty() => {
                    return Err(invalid("custom channel needs a tag"));
                }
                _ => {}
            }
        }

        for forwarder in &self.forwarders {
            match forwarder {
                ForwarderConfig::File { path, .. } if path.as_os_str().is_empty() => {
                    return Err(invalid("file forwarder needs a path"));
                }
                ForwarderConfig::Custom { tag, .. } if tag.is_empty() => {
                    return Err(invalid("custom forwarder needs a tag"));
                }
                _ => {}
            }
        }

        for computer in &self.computers {
            if let ComputerConfig::Derived {
                prefix,
                current_windows,
                min_span_fraction,
                tick_period_ms,
            } = computer
            {
                TalkerId::try_from(prefix.as_str())
                    .map_err(|e| invalid(format!("computer prefix: {}", e)))?;
                if current_windows.is_empty() || current_windows.contains(&0) {
                    return Err(invalid("currentWindows must be non-empty and positive"));
                }
                let unique: BTreeSet<_> = current_windows.iter().collect();
                if unique.len() != current_windows.len() {
                    return Err(invalid(format!(
                        "currentWindows has duplicates: {:?}",
                        current_windows
                    )));
                }
                if !(*min_span_fraction > 0.0 && *min_span_fraction <= 1.0) {
                    return Err(invalid(format!(
                        "minSpanFraction must be in (0, 1], got {}",
                        min_span_fraction
                    )));
                }
                if *tick_period_ms == 0 {
                    return Err(invalid("tickPeriodMs must be positive"));
                }
            }
        }

        if let Some(admin) = &self.admin {
            admin.address()?;
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidData(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document() {
        let config: MuxConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MuxConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_document() {
        let config: MuxConfig = serde_json::from_value(json!({
            "channels": [
                { "type": "file", "path": "log.nmea", "pauseMs": 100, "loop": true },
                { "type": "tcp", "host": "localhost", "port": 10110,
                  "deviceFilters": ["II"], "sentenceFilters": ["~GSV"] }
            ],
            "forwarders": [
                { "type": "console" },
                { "type": "tcp", "port": 10111 },
                { "type": "file", "path": "out.nmea", "append": true }
            ],
            "computers": [{ "type": "derived", "prefix": "OS" }],
            "cache": { "bspFactor": 1.1 },
            "admin": {}
        }))
        .unwrap();

        assert_eq!(
            config.channels[0].kind,
            ChannelKind::File {
                path: PathBuf::from("log.nmea"),
                pause_ms: Some(100),
                looping: true,
            }
        );
        assert_eq!(config.channels[1].filter.device_filters(), ["II".to_string()]);
        assert_eq!(config.forwarders[1], ForwarderConfig::Tcp { port: 10111 });
        assert_eq!(
            config.computers[0],
            ComputerConfig::Derived {
                prefix: "OS".into(),
                current_windows: vec![600, 3600],
                min_span_fraction: 0.5,
                tick_period_ms: 1000,
            }
        );
        assert_eq!(config.cache.bsp_factor, 1.1);
        assert_eq!(config.admin.as_ref().unwrap().bind, "0.0.0.0:9999");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_kind() {
        let channel: ChannelConfig = serde_json::from_value(json!({
            "type": "custom", "tag": "serial", "params": { "device": "/dev/ttyUSB0" }
        }))
        .unwrap();
        match channel.kind {
            ChannelKind::Custom { tag, params } => {
                assert_eq!(tag, "serial");
                assert_eq!(params["device"], "/dev/ttyUSB0");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<ForwarderConfig, _> =
            serde_json::from_value(json!({ "type": "carrier-pigeon" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_prefix() {
        let config = MuxConfig {
            computers: vec![ComputerConfig::Derived {
                prefix: "O".into(),
                current_windows: vec![600],
                min_span_fraction: 0.5,
                tick_period_ms: 1000,
            }],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidData(_))));
    }

    #[test]
    fn test_duplicate_windows() {
        let config = MuxConfig {
            computers: vec![ComputerConfig::Derived {
                prefix: "OS".into(),
                current_windows: vec![600, 600],
                min_span_fraction: 0.5,
                tick_period_ms: 1000,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_admin_bind() {
        let config = MuxConfig {
            admin: Some(AdminConfig {
                bind: "not an address".into(),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MuxConfig::load(Path::new("/nonexistent/nmea.mux.json")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
