//! Service configuration
//!
//! Layered with figment: built-in defaults, then the config file (format by
//! extension), then `IOSRV_` environment variables (`__` separates nested
//! keys, e.g. `IOSRV_BACKOFF__MAX_MS=10000`).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cpcoe_link::{
    BackoffPolicy, ConfigBlockLayout, DeviceDescriptor, ErrorBlock, PollerConfig, SerialParams,
    WiringEntry, CHANNEL_COUNT,
};
use errors::{IoSrvError, IoSrvResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "IOSRV_";

// ============================================================================
// Schema
// ============================================================================

/// Reconnect backoff, milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffSettings {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            initial_ms: policy.initial.as_millis() as u64,
            max_ms: policy.max.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One module on one serial line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    pub name: String,
    pub bus_address: u8,
    pub serial: SerialParams,
    /// Wired channels; indices not listed are treated as unused inputs
    #[serde(default)]
    pub channels: Vec<WiringEntry>,
    /// Where the module keeps its `UnivChs[i]` records; enables the startup check
    #[serde(default)]
    pub config_block: Option<ConfigBlockLayout>,
    /// Error registers polled after every cycle
    #[serde(default)]
    pub error_block: Option<ErrorBlock>,
}

impl DeviceSettings {
    /// Complete the wiring list and validate it into a descriptor
    pub fn to_descriptor(&self) -> IoSrvResult<DeviceDescriptor> {
        let wiring = fill_unlisted_channels(&self.channels);
        let mut descriptor = DeviceDescriptor::new(
            self.name.clone(),
            self.bus_address,
            self.serial.clone(),
            &wiring,
        )
        .map_err(|e| IoSrvError::device(&self.name, e))?;

        if let Some(layout) = self.config_block {
            descriptor = descriptor
                .with_config_block(layout)
                .map_err(|e| IoSrvError::device(&self.name, e))?;
        }
        if let Some(block) = self.error_block {
            descriptor = descriptor
                .with_error_block(block)
                .map_err(|e| IoSrvError::device(&self.name, e))?;
        }
        Ok(descriptor)
    }
}

/// Service configuration root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IoSrvConfig {
    pub poll_interval_ms: u64,
    pub link_error_threshold: u32,
    pub backoff: BackoffSettings,
    pub logging: LoggingSettings,
    pub devices: Vec<DeviceSettings>,
}

impl Default for IoSrvConfig {
    fn default() -> Self {
        let poller = PollerConfig::default();
        Self {
            poll_interval_ms: poller.poll_interval.as_millis() as u64,
            link_error_threshold: poller.link_error_threshold,
            backoff: BackoffSettings::default(),
            logging: LoggingSettings::default(),
            devices: Vec::new(),
        }
    }
}

/// Add an unused-input entry for every index the wiring leaves out.
/// Listed entries are kept untouched, including invalid ones.
pub fn fill_unlisted_channels(channels: &[WiringEntry]) -> Vec<WiringEntry> {
    let listed: HashSet<usize> = channels.iter().map(|c| c.index).collect();
    let mut wiring = channels.to_vec();
    wiring.extend(
        (0..CHANNEL_COUNT)
            .filter(|i| !listed.contains(i))
            .map(WiringEntry::unused),
    );
    wiring.sort_by_key(|e| e.index);
    wiring
}

/// Identity of a serial port: symlinks resolved when the device exists,
/// otherwise the lexically normalised path. Windows `COMn` names ignore case.
fn port_key(port: &str) -> PathBuf {
    let port = port.trim();
    if port.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("com")) {
        return PathBuf::from(port.to_ascii_uppercase());
    }
    std::fs::canonicalize(port).unwrap_or_else(|_| Path::new(port).components().collect())
}

// ============================================================================
// Loading
// ============================================================================

impl IoSrvConfig {
    /// Layer defaults, the file at `path` and the environment
    pub fn load(path: &Path) -> IoSrvResult<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    fn load_with_env_prefix(path: &Path, env_prefix: &str) -> IoSrvResult<Self> {
        if !path.exists() {
            return Err(IoSrvError::FileNotFound(path.display().to_string()));
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| IoSrvError::Configuration("Invalid file extension".to_string()))?;

        let figment = Figment::from(Serialized::defaults(IoSrvConfig::default()));
        let figment = match extension {
            "json" => figment.merge(Json::file(path)),
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            _ => {
                return Err(IoSrvError::Configuration(format!(
                    "Unsupported config format: {}",
                    extension
                )))
            },
        };

        Self::extract(figment.merge(Env::prefixed(env_prefix).split("__")))
    }

    fn extract(figment: Figment) -> IoSrvResult<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| IoSrvError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Service-level checks; per-device wiring is checked by `descriptors`
    pub fn validate(&self) -> IoSrvResult<()> {
        if self.devices.is_empty() {
            return Err(IoSrvError::MissingConfig("devices".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(IoSrvError::invalid_config(
                "poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.link_error_threshold == 0 {
            return Err(IoSrvError::invalid_config(
                "link_error_threshold",
                "must be at least 1",
            ));
        }
        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms {
            return Err(IoSrvError::invalid_config(
                "backoff",
                format!(
                    "need 0 < initial_ms <= max_ms, got {}/{}",
                    self.backoff.initial_ms, self.backoff.max_ms
                ),
            ));
        }

        let mut names = HashSet::new();
        let mut ports: HashMap<PathBuf, &str> = HashMap::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(IoSrvError::invalid_config("devices.name", "must not be empty"));
            }
            if !names.insert(device.name.as_str()) {
                return Err(IoSrvError::DuplicateDevice(device.name.clone()));
            }
            // Each poller owns its serial line
            if device.serial.port.trim().is_empty() {
                continue;
            }
            if let Some(owner) = ports.insert(port_key(&device.serial.port), &device.name) {
                return Err(IoSrvError::invalid_config(
                    "devices.serial.port",
                    format!(
                        "{} is used by both {} and {}",
                        device.serial.port.trim(),
                        owner,
                        device.name
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            link_error_threshold: self.link_error_threshold,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(self.backoff.initial_ms),
                max: Duration::from_millis(self.backoff.max_ms),
            },
        }
    }

    /// Build a validated descriptor for every device, failing on the first bad one
    pub fn descriptors(&self) -> IoSrvResult<Vec<Arc<DeviceDescriptor>>> {
        self.devices
            .iter()
            .map(|device| {
                let descriptor = device.to_descriptor()?;
                debug!(
                    "Device {}: slave {} on {}",
                    descriptor.name(),
                    descriptor.bus_address(),
                    descriptor.serial().port
                );
                Ok(Arc::new(descriptor))
            })
            .collect()
    }
}
