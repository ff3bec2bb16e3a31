//! Transport configuration surface

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Memory-diagnostics verbosity applied once at startup.
///
/// Controls how aggressively the runtime records allocation diagnostics
/// for leaked connection buffers. One-way: the level is validated and
/// applied during startup and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryDiagnostics {
    /// No diagnostics at all
    Disabled,
    /// Sampled, call sites only
    SampledLight,
    /// Sampled, with recent call records
    SampledDetailed,
    /// Every allocation tracked with full call records
    Exhaustive,
}

impl FromStr for MemoryDiagnostics {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(MemoryDiagnostics::Disabled),
            "sampled-light" => Ok(MemoryDiagnostics::SampledLight),
            "sampled-detailed" => Ok(MemoryDiagnostics::SampledDetailed),
            "exhaustive" => Ok(MemoryDiagnostics::Exhaustive),
            other => Err(TransportError::Config(format!(
                "unknown memory diagnostics level: {other}"
            ))),
        }
    }
}

/// Transport security: explicit variant instead of a nullable TLS field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SecurityConfig {
    /// Plain TCP, no security stage in the pipeline
    Plain,
    /// TLS termination before any other stage observes bytes
    Secured {
        /// Certificate chain file (PEM)
        cert_path: PathBuf,
        /// Private key file (PEM)
        key_path: PathBuf,
    },
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig::Plain
    }
}

impl SecurityConfig {
    pub fn is_secured(&self) -> bool {
        matches!(self, SecurityConfig::Secured { .. })
    }
}

/// MQTT transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Listening address (e.g. "0.0.0.0")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Listening port
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    /// Registered name of the payload adaptor
    #[serde(default = "default_adaptor")]
    pub adaptor: String,
    /// Memory-diagnostics verbosity, validated at startup
    #[serde(default = "default_memory_diagnostics")]
    pub memory_diagnostics: String,
    /// Thread count of the connection-accepting pool
    #[serde(default = "default_accept_pool_threads")]
    pub accept_pool_threads: usize,
    /// Thread count of the connection-processing pool
    #[serde(default = "default_worker_pool_threads")]
    pub worker_pool_threads: usize,
    /// Hard ceiling on the inbound frame size in bytes
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// Plain TCP or TLS termination
    #[serde(default)]
    pub security: SecurityConfig,
    /// Graceful drain budget per pool during shutdown
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    gridlink_core::DEFAULT_MQTT_PORT
}

fn default_adaptor() -> String {
    "json".to_string()
}

fn default_memory_diagnostics() -> String {
    "disabled".to_string()
}

fn default_accept_pool_threads() -> usize {
    1
}

fn default_worker_pool_threads() -> usize {
    12
}

fn default_max_payload_size() -> usize {
    65536
}

fn default_drain_timeout_secs() -> u64 {
    5
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            adaptor: default_adaptor(),
            memory_diagnostics: default_memory_diagnostics(),
            accept_pool_threads: default_accept_pool_threads(),
            worker_pool_threads: default_worker_pool_threads(),
            max_payload_size: default_max_payload_size(),
            security: SecurityConfig::default(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl TransportConfig {
    /// Combined listen address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    /// Validate the static portions of the configuration.
    ///
    /// The adaptor name is validated separately against the registry at
    /// startup; TLS material is validated when it is loaded.
    pub fn validate(&self) -> Result<MemoryDiagnostics> {
        if self.accept_pool_threads == 0 {
            return Err(TransportError::Config(
                "accept_pool_threads must be positive".to_string(),
            ));
        }
        if self.worker_pool_threads == 0 {
            return Err(TransportError::Config(
                "worker_pool_threads must be positive".to_string(),
            ));
        }
        if self.max_payload_size == 0 {
            return Err(TransportError::Config(
                "max_payload_size must be positive".to_string(),
            ));
        }
        self.memory_diagnostics.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:1883");
        assert_eq!(config.adaptor, "json");
        assert_eq!(config.max_payload_size, 65536);
        assert_eq!(config.accept_pool_threads, 1);
        assert_eq!(config.worker_pool_threads, 12);
        assert!(!config.security.is_secured());
        assert_eq!(config.validate().unwrap(), MemoryDiagnostics::Disabled);
    }

    #[test]
    fn test_diagnostics_levels() {
        for (raw, level) in [
            ("disabled", MemoryDiagnostics::Disabled),
            ("sampled-light", MemoryDiagnostics::SampledLight),
            ("sampled-detailed", MemoryDiagnostics::SampledDetailed),
            ("SAMPLED-LIGHT", MemoryDiagnostics::SampledLight),
            ("EXHAUSTIVE", MemoryDiagnostics::Exhaustive),
        ] {
            assert_eq!(raw.parse::<MemoryDiagnostics>().unwrap(), level);
        }

        let err = "paranoid".parse::<MemoryDiagnostics>().unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = TransportConfig {
            worker_pool_threads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransportConfig {
            max_payload_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_security_config_tagged() {
        let plain: SecurityConfig = serde_json::from_str(r#"{"mode":"plain"}"#).unwrap();
        assert!(!plain.is_secured());

        let secured: SecurityConfig = serde_json::from_str(
            r#"{"mode":"secured","cert_path":"/etc/gridlink/server.pem","key_path":"/etc/gridlink/server.key"}"#,
        )
        .unwrap();
        assert!(secured.is_secured());
    }
}
