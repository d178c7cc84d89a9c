//! Backend configuration read from the process environment

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Environment variables consulted when selecting a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvVar {
    /// Any non-blank value selects the local stderr sink
    Dev,
    /// `host:port` of a remote collector
    Addr,
    /// Wire dialect spoken to the remote collector
    Implementation,
}

impl EnvVar {
    /// Canonical environment variable key
    pub const fn key(self) -> &'static str {
        match self {
            EnvVar::Dev => "STATSD_DEV",
            EnvVar::Addr => "STATSD_ADDR",
            EnvVar::Implementation => "STATSD_IMPLEMENTATION",
        }
    }
}

/// Wire dialect of a remote collector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Plain etsy statsd
    Statsd,
    /// Datadog agent (DogStatsD)
    #[default]
    Datadog,
    /// Statsite
    Statsite,
}

impl Dialect {
    /// Dialect name as used in `STATSD_IMPLEMENTATION`
    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::Statsd => "statsd",
            Dialect::Datadog => "datadog",
            Dialect::Statsite => "statsite",
        }
    }

    /// Whether the collector understands the distribution metric type
    pub const fn supports_distribution(self) -> bool {
        matches!(self, Dialect::Datadog)
    }

    /// Whether the collector understands `|#tag` suffixes
    pub const fn supports_tags(self) -> bool {
        matches!(self, Dialect::Datadog)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "statsd" => Ok(Dialect::Statsd),
            "datadog" => Ok(Dialect::Datadog),
            "statsite" => Ok(Dialect::Statsite),
            other => Err(other.to_string()),
        }
    }
}

/// Raw configuration signals
///
/// Values are kept as given; blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsdConfig {
    /// Development mode flag
    #[serde(default)]
    pub dev: Option<String>,
    /// Remote collector address
    #[serde(default)]
    pub addr: Option<String>,
    /// Remote wire dialect
    #[serde(default)]
    pub implementation: Option<String>,
}

/// Which sink the configuration selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    /// Human-readable lines on stderr
    Local,
    /// UDP packets to a collector
    Remote {
        /// `host:port` target
        addr: String,
        /// Wire dialect
        dialect: Dialect,
    },
    /// Discard everything
    Null,
}

impl StatsdConfig {
    /// Read the signals from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the signals through an arbitrary lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            dev: lookup(EnvVar::Dev.key()),
            addr: lookup(EnvVar::Addr.key()),
            implementation: lookup(EnvVar::Implementation.key()),
        }
    }

    /// Resolve the dialect, falling back to Datadog when unset or unknown
    pub fn dialect(&self) -> Dialect {
        match present(&self.implementation) {
            None => Dialect::default(),
            Some(value) => value.parse().unwrap_or_else(|unknown| {
                warn!(
                    dialect = %unknown,
                    "unknown {} value, using {}",
                    EnvVar::Implementation.key(),
                    Dialect::default()
                );
                Dialect::default()
            }),
        }
    }

    /// Pick a backend: dev flag first, then address, then null
    pub fn backend_choice(&self) -> BackendChoice {
        if present(&self.dev).is_some() {
            return BackendChoice::Local;
        }
        if let Some(addr) = present(&self.addr) {
            return BackendChoice::Remote {
                addr: addr.to_string(),
                dialect: self.dialect(),
            };
        }
        BackendChoice::Null
    }
}

/// Non-blank value of a signal
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> StatsdConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StatsdConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_env_keys() {
        assert_eq!(EnvVar::Dev.key(), "STATSD_DEV");
        assert_eq!(EnvVar::Addr.key(), "STATSD_ADDR");
        assert_eq!(EnvVar::Implementation.key(), "STATSD_IMPLEMENTATION");
    }

    #[test]
    fn test_no_signals_is_null() {
        assert_eq!(config(&[]).backend_choice(), BackendChoice::Null);
    }

    #[test]
    fn test_dev_wins_over_addr() {
        let cfg = config(&[("STATSD_DEV", "1"), ("STATSD_ADDR", "127.0.0.1:8125")]);
        assert_eq!(cfg.backend_choice(), BackendChoice::Local);
    }

    #[test]
    fn test_addr_defaults_to_datadog() {
        let cfg = config(&[("STATSD_ADDR", "127.0.0.1:8125")]);
        assert_eq!(
            cfg.backend_choice(),
            BackendChoice::Remote {
                addr: "127.0.0.1:8125".into(),
                dialect: Dialect::Datadog,
            }
        );
    }

    #[test]
    fn test_addr_with_dialect() {
        let cfg = config(&[
            ("STATSD_ADDR", "statsd.local:8125"),
            ("STATSD_IMPLEMENTATION", "Statsite"),
        ]);
        assert_eq!(
            cfg.backend_choice(),
            BackendChoice::Remote {
                addr: "statsd.local:8125".into(),
                dialect: Dialect::Statsite,
            }
        );
    }

    #[test]
    fn test_blank_values_are_absent() {
        let cfg = config(&[("STATSD_DEV", "  "), ("STATSD_ADDR", "")]);
        assert_eq!(cfg.backend_choice(), BackendChoice::Null);

        let cfg = config(&[("STATSD_ADDR", "10.0.0.1:8125"), ("STATSD_IMPLEMENTATION", " ")]);
        assert_eq!(cfg.dialect(), Dialect::Datadog);
    }

    #[test]
    fn test_unknown_dialect_falls_back() {
        let cfg = config(&[("STATSD_ADDR", "10.0.0.1:8125"), ("STATSD_IMPLEMENTATION", "graphite")]);
        assert_eq!(cfg.dialect(), Dialect::Datadog);
    }

    #[test]
    fn test_address_is_not_validated() {
        let cfg = config(&[("STATSD_ADDR", "not an address")]);
        assert!(matches!(cfg.backend_choice(), BackendChoice::Remote { .. }));
    }

    #[test]
    fn test_dialect_capabilities() {
        assert!(Dialect::Datadog.supports_distribution());
        assert!(Dialect::Datadog.supports_tags());
        assert!(!Dialect::Statsd.supports_distribution());
        assert!(!Dialect::Statsite.supports_tags());
        assert_eq!(Dialect::Statsite.to_string(), "statsite");
    }

    #[test]
    fn test_deserialize_config() {
        let cfg: StatsdConfig =
            serde_json::from_str(r#"{"addr": "127.0.0.1:8125", "implementation": "statsd"}"#)
                .unwrap();
        assert!(cfg.dev.is_none());
        assert_eq!(cfg.dialect(), Dialect::Statsd);

        let dialect: Dialect = serde_json::from_str(r#""datadog""#).unwrap();
        assert_eq!(dialect, Dialect::Datadog);
    }
}
