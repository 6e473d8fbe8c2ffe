//! Device descriptor
//!
//! Bus address, serial line parameters and the validated per-channel wiring
//! of one CPCOE module. Built once at configuration time, read-only afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::blocks::{ConfigBlockLayout, ErrorBlock};
use crate::catalog::{
    ChannelDirection, ChannelKind, InputChannelType, OutputChannelType, CHANNEL_COUNT,
};
use crate::error::{ConfigError, ConfigResult};

/// Default read timeout (milliseconds)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Largest FC03 request frame: addr + fc + start(2) + qty(2) + crc(2)
const MAX_REQUEST_FRAME: u32 = 8;
/// Largest FC03 response frame: addr + fc + count + 125 registers + crc(2)
const MAX_RESPONSE_FRAME: u32 = 255;
/// Two 3.5 character inter-frame gaps, rounded up
const FRAME_GAP_CHARS: u32 = 7;

// ============================================================================
// Serial parameters
// ============================================================================

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial link parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialParams {
    /// Serial device path (e.g. `/dev/ttyUSB0`, `COM13`)
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    /// Configured read timeout (milliseconds)
    pub read_timeout_ms: u64,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 19200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl SerialParams {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.port.is_empty() {
            return Err(ConfigError::serial("serial port not specified"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::serial("baud rate must be positive"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::serial(format!(
                "data bits {} not in 5-8",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConfigError::serial(format!(
                "stop bits {} not 1 or 2",
                self.stop_bits
            )));
        }
        Ok(())
    }

    /// Bits on the wire per character (start + data + parity + stop)
    pub fn character_bits(&self) -> u32 {
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        };
        1 + u32::from(self.data_bits) + parity + u32::from(self.stop_bits)
    }

    /// Time to put the largest read request and response on the wire
    pub fn minimum_read_timeout(&self) -> Duration {
        let chars = MAX_REQUEST_FRAME + MAX_RESPONSE_FRAME + FRAME_GAP_CHARS;
        let bits = u64::from(chars * self.character_bits());
        let micros = (bits * 1_000_000).div_ceil(u64::from(self.baud_rate.max(1)));
        Duration::from_micros(micros)
    }

    /// Configured timeout, never shorter than the bus frame time
    pub fn effective_read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms).max(self.minimum_read_timeout())
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// One line of the externally supplied wiring description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiringEntry {
    pub index: usize,
    pub direction: ChannelDirection,
    pub type_code: u16,
}

impl WiringEntry {
    pub fn input(index: usize, kind: InputChannelType) -> Self {
        Self {
            index,
            direction: ChannelDirection::Input,
            type_code: kind.code(),
        }
    }

    pub fn output(index: usize, kind: OutputChannelType) -> Self {
        Self {
            index,
            direction: ChannelDirection::Output,
            type_code: kind.code(),
        }
    }

    pub fn unused(index: usize) -> Self {
        Self::input(index, InputChannelType::NotUsed)
    }
}

/// Validated channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub index: usize,
    pub kind: ChannelKind,
}

impl ChannelConfig {
    pub fn direction(&self) -> ChannelDirection {
        self.kind.direction()
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// Addressable CPCOE module on a serial bus
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    name: String,
    bus_address: u8,
    serial: SerialParams,
    channels: Vec<ChannelConfig>,
    config_block: Option<ConfigBlockLayout>,
    error_block: Option<ErrorBlock>,
}

impl DeviceDescriptor {
    /// Validate the wiring and build a descriptor. Fails without side effects
    /// on the first offending element.
    pub fn new(
        name: impl Into<String>,
        bus_address: u8,
        serial: SerialParams,
        wiring: &[WiringEntry],
    ) -> ConfigResult<Self> {
        if !(1..=247).contains(&bus_address) {
            return Err(ConfigError::InvalidAddress(bus_address));
        }
        serial.validate()?;

        let mut entries = wiring.to_vec();
        entries.sort_by_key(|e| e.index);

        let mut channels = Vec::with_capacity(CHANNEL_COUNT);
        for (position, entry) in entries.iter().enumerate() {
            if entry.index >= CHANNEL_COUNT {
                return Err(ConfigError::invalid_channel(
                    entry.index,
                    format!("index out of range (module has {CHANNEL_COUNT} channels)"),
                ));
            }
            if entry.index < position {
                return Err(ConfigError::invalid_channel(
                    entry.index,
                    "duplicate channel index",
                ));
            }
            if entry.index > position {
                return Err(ConfigError::invalid_channel(position, "channel missing"));
            }

            let kind = ChannelKind::resolve(entry.direction, entry.type_code)
                .map_err(|e| ConfigError::invalid_channel(entry.index, e.to_string()))?;
            channels.push(ChannelConfig {
                index: entry.index,
                kind,
            });
        }

        if channels.len() < CHANNEL_COUNT {
            return Err(ConfigError::invalid_channel(
                channels.len(),
                "channel missing",
            ));
        }

        Ok(Self {
            name: name.into(),
            bus_address,
            serial,
            channels,
            config_block: None,
            error_block: None,
        })
    }

    /// Check the module's own channel configuration before polling it
    pub fn with_config_block(mut self, layout: ConfigBlockLayout) -> ConfigResult<Self> {
        layout.validate()?;
        self.config_block = Some(layout);
        Ok(self)
    }

    /// Poll the module's error registers after every cycle
    pub fn with_error_block(mut self, block: ErrorBlock) -> ConfigResult<Self> {
        block.validate()?;
        self.error_block = Some(block);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus_address(&self) -> u8 {
        self.bus_address
    }

    pub fn serial(&self) -> &SerialParams {
        &self.serial
    }

    /// Channels ordered by physical index
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    pub fn configured_channels(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter().filter(|c| c.kind.is_used())
    }

    pub fn config_block(&self) -> Option<&ConfigBlockLayout> {
        self.config_block.as_ref()
    }

    pub fn error_block(&self) -> Option<&ErrorBlock> {
        self.error_block.as_ref()
    }
}
