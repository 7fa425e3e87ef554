// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway configuration: engine timers, device list, and per-device
// resilience settings.  Loaded from JSON; every field has a default so a
// minimal file only needs device ids and connections.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SpoolwerkError};
use crate::types::DeviceId;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SPOOLWERK_CONFIG";

/// Files probed, in order, when neither an explicit path nor the env var is set.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["config/local.json", "config/default.json"];

/// Longest offline hold a device may be configured with (one year).
pub const MAX_OFFLINE_QUEUE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Settings shared by every device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the expiry sweeper scans offline-held jobs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: f64,
    /// Terminal jobs kept per device for status queries.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> Duration {
        secs_or(self.sweep_interval_secs, default_sweep_interval())
    }
}

/// One physical print target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    pub connection: DeviceKind,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl DeviceConfig {
    pub fn new(id: impl Into<DeviceId>, connection: DeviceKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            connection,
            resilience: ResilienceConfig::default(),
            queue_capacity: default_queue_capacity(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// How the gateway reaches a device.  The tag selects the capability variant
/// at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum DeviceKind {
    /// In-memory device for development and tests.
    Simulated {
        #[serde(default)]
        print_delay_ms: u64,
        #[serde(default = "default_true")]
        reachable: bool,
    },
    /// Device node on the local machine, e.g. `/dev/usb/lp0`.
    Direct { path: PathBuf },
    /// Network spooler speaking LPR/LPD or raw TCP.
    Spooled {
        host: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        protocol: SpoolProtocol,
        /// LPR queue name; ignored for raw TCP.
        #[serde(default = "default_lpr_queue")]
        queue: String,
        #[serde(default = "default_connect_timeout")]
        connect_timeout_secs: f64,
    },
}

impl DeviceKind {
    pub fn adapter_name(&self) -> &'static str {
        match self {
            Self::Simulated { .. } => "simulated",
            Self::Direct { .. } => "direct",
            Self::Spooled { .. } => "spooled",
        }
    }
}

/// Wire protocol for spooled devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoolProtocol {
    /// RFC 1179 line printer daemon.
    #[default]
    Lpr,
    /// JetDirect-style raw socket.
    Raw,
}

impl SpoolProtocol {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Lpr => 515,
            Self::Raw => 9100,
        }
    }
}

/// Retry, probe, and offline-hold settings for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Rediscover the device handle between attempts.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Total delivery attempts per dispatch.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed pause between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: f64,
    #[serde(default = "default_offline_queue_timeout")]
    pub offline_queue_timeout_secs: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            health_check_interval_secs: default_health_check_interval(),
            offline_queue_timeout_secs: default_offline_queue_timeout(),
        }
    }
}

impl ResilienceConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        secs_or(self.health_check_interval_secs, default_health_check_interval())
    }

    pub fn offline_queue_timeout(&self) -> Duration {
        secs_or(self.offline_queue_timeout_secs, default_offline_queue_timeout())
    }

    /// The offline timeout as a calendar duration, for deadline arithmetic.
    /// Capped at `MAX_OFFLINE_QUEUE_TIMEOUT`.
    pub fn offline_queue_deadline(&self) -> chrono::Duration {
        let timeout = self.offline_queue_timeout().min(MAX_OFFLINE_QUEUE_TIMEOUT);
        chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

impl GatewayConfig {
    /// Parse a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: GatewayConfig = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Locate and load the configuration.
    ///
    /// Looks, in order, at `explicit`, `$SPOOLWERK_CONFIG`, then
    /// `config/local.json` and `config/default.json` relative to the working
    /// directory.  With no file at all, returns the development default of
    /// two simulated devices.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut search: Vec<PathBuf> = Vec::new();
        if let Some(path) = explicit {
            search.push(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            search.push(PathBuf::from(path));
        }
        search.extend(DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from));

        for path in &search {
            if path.exists() {
                info!(path = %path.display(), "loading config");
                return Self::from_file(path);
            }
        }

        warn!("no config file found, using simulated devices");
        Ok(Self::development())
    }

    /// Two simulated devices named like the production pair.
    pub fn development() -> Self {
        let simulated = || DeviceKind::Simulated {
            print_delay_ms: 500,
            reachable: true,
        };
        let mut label = DeviceConfig::new("label", simulated());
        label.name = Some("Simulated Label Printer".into());
        let mut document = DeviceConfig::new("document", simulated());
        document.name = Some("Simulated Document Printer".into());

        Self {
            engine: EngineConfig::default(),
            devices: vec![label, document],
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        if !(self.engine.sweep_interval_secs > 0.0) {
            issues.push("engine.sweep_interval_secs must be positive".to_string());
        }

        for (i, device) in self.devices.iter().enumerate() {
            if device.id.as_str().trim().is_empty() {
                issues.push(format!("device at index {i} has an empty id"));
            } else if !seen.insert(device.id.clone()) {
                issues.push(format!("duplicate device id '{}'", device.id));
            }
            if let Err(SpoolwerkError::Config(msg)) = device.validate() {
                issues.push(msg);
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SpoolwerkError::Config(issues.join("; ")))
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        let r = &self.resilience;

        if self.queue_capacity == 0 {
            issues.push(format!("device '{}': queue_capacity must be at least 1", self.id));
        }
        if r.max_retries == 0 {
            issues.push(format!("device '{}': max_retries must be at least 1", self.id));
        }
        if !(r.health_check_interval_secs > 0.0) {
            issues.push(format!(
                "device '{}': health_check_interval_secs must be positive",
                self.id
            ));
        }
        if !(r.offline_queue_timeout_secs > 0.0) {
            issues.push(format!(
                "device '{}': offline_queue_timeout_secs must be positive",
                self.id
            ));
        } else if r.offline_queue_timeout_secs > MAX_OFFLINE_QUEUE_TIMEOUT.as_secs_f64() {
            issues.push(format!(
                "device '{}': offline_queue_timeout_secs exceeds {}",
                self.id,
                MAX_OFFLINE_QUEUE_TIMEOUT.as_secs()
            ));
        }
        if let DeviceKind::Spooled { host, .. } = &self.connection {
            if host.trim().is_empty() {
                issues.push(format!("device '{}': spooled host is empty", self.id));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SpoolwerkError::Config(issues.join("; ")))
        }
    }
}

/// Seconds as a `Duration`, falling back when the value is negative or NaN.
fn secs_or(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| Duration::from_secs_f64(fallback))
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> f64 {
    5.0
}

fn default_history_limit() -> usize {
    50
}

fn default_queue_capacity() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_health_check_interval() -> f64 {
    30.0
}

fn default_offline_queue_timeout() -> f64 {
    600.0
}

fn default_lpr_queue() -> String {
    "lp".to_string()
}

fn default_connect_timeout() -> f64 {
    5.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "engine": { "sweep_interval_secs": 2.5 },
        "devices": [
            {
                "id": "label",
                "name": "Label Printer",
                "connection": { "adapter": "direct", "path": "/dev/usb/lp0" },
                "resilience": { "max_retries": 5, "retry_delay_ms": 2000 }
            },
            {
                "id": "document",
                "connection": { "adapter": "spooled", "host": "cups.local", "protocol": "raw" },
                "queue_capacity": 10
            }
        ]
    }"#;

    #[test]
    fn resilience_defaults() {
        let config = ResilienceConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert_eq!(config.offline_queue_timeout(), Duration::from_secs(600));
        assert_eq!(config.offline_queue_deadline(), chrono::Duration::seconds(600));
    }

    #[test]
    fn parses_sample_config() {
        let config: GatewayConfig = serde_json::from_str(SAMPLE).expect("parse");
        assert_eq!(config.engine.sweep_interval(), Duration::from_millis(2500));
        assert_eq!(config.engine.history_limit, 50);
        assert_eq!(config.devices.len(), 2);

        let label = &config.devices[0];
        assert_eq!(label.display_name(), "Label Printer");
        assert_eq!(label.resilience.max_retries, 5);
        assert_eq!(label.resilience.retry_delay_ms, 2000);
        // Unspecified resilience fields keep their defaults.
        assert_eq!(label.resilience.offline_queue_timeout_secs, 600.0);
        assert_eq!(label.queue_capacity, 50);
        assert_eq!(
            label.connection,
            DeviceKind::Direct {
                path: PathBuf::from("/dev/usb/lp0")
            }
        );

        let document = &config.devices[1];
        assert_eq!(document.display_name(), "document");
        assert_eq!(document.queue_capacity, 10);
        match &document.connection {
            DeviceKind::Spooled {
                protocol, queue, port, ..
            } => {
                assert_eq!(*protocol, SpoolProtocol::Raw);
                assert_eq!(protocol.default_port(), 9100);
                assert_eq!(queue, "lp");
                assert!(port.is_none());
            }
            other => panic!("unexpected connection {other:?}"),
        }
        config.validate().expect("sample is valid");
    }

    #[test]
    fn unknown_adapter_is_rejected() {
        let json = r#"{ "devices": [ { "id": "x", "connection": { "adapter": "fax" } } ] }"#;
        assert!(serde_json::from_str::<GatewayConfig>(json).is_err());
    }

    #[test]
    fn validate_reports_duplicates_and_bad_values() {
        let mut config = GatewayConfig::development();
        config.devices.push(DeviceConfig::new(
            "label",
            DeviceKind::Simulated {
                print_delay_ms: 0,
                reachable: true,
            },
        ));
        config.devices[1].queue_capacity = 0;
        config.devices[0].resilience.max_retries = 0;

        let err = config.validate().expect_err("invalid");
        let msg = err.to_string();
        assert!(msg.contains("duplicate device id 'label'"));
        assert!(msg.contains("queue_capacity"));
        assert!(msg.contains("max_retries"));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, SAMPLE).expect("write");

        let config = GatewayConfig::load(Some(&path)).expect("load");
        assert_eq!(config.devices.len(), 2);
    }

    #[test]
    fn from_file_surfaces_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("write");

        assert!(matches!(
            GatewayConfig::from_file(&path),
            Err(SpoolwerkError::Serialization(_))
        ));
    }

    #[test]
    fn development_config_has_label_and_document() {
        let config = GatewayConfig::development();
        let ids: Vec<&str> = config.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["label", "document"]);
        config.validate().expect("valid");
    }

    #[test]
    fn nonsense_intervals_fall_back_to_defaults() {
        let config = ResilienceConfig {
            health_check_interval_secs: -1.0,
            ..Default::default()
        };
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
    }

    #[test]
    fn oversized_offline_timeout_is_rejected_and_capped() {
        let mut device = DeviceConfig::new(
            "label",
            DeviceKind::Simulated {
                print_delay_ms: 0,
                reachable: true,
            },
        );
        device.resilience.offline_queue_timeout_secs = 1e13;

        let err = device.validate().expect_err("too long");
        assert!(err.to_string().contains("offline_queue_timeout_secs exceeds"));
        assert_eq!(
            device.resilience.offline_queue_deadline(),
            chrono::Duration::days(365)
        );

        device.resilience.offline_queue_timeout_secs = MAX_OFFLINE_QUEUE_TIMEOUT.as_secs_f64();
        device.validate().expect("bound itself is allowed");
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let config: GatewayConfig =
            serde_json::from_str(include_str!("../../../config/example.json")).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.devices.len(), 2);
        assert!(matches!(
            config.devices[1].connection,
            DeviceKind::Spooled { protocol: SpoolProtocol::Lpr, port: None, .. }
        ));
    }
}
