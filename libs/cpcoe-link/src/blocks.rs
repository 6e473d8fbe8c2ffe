//! Auxiliary module data blocks
//!
//! Besides the channel values the module exposes its channel configuration
//! (`UnivChs[i].ChDir`, `UnivChs[i].ChTyp`, ...) and a block of error
//! registers. Where they live depends on the firmware data map, so both
//! layouts come from configuration. Both blocks are only ever read.

use serde::{Deserialize, Serialize};

use crate::catalog::CHANNEL_COUNT;
use crate::descriptor::DeviceDescriptor;
use crate::error::{CodecError, ConfigError, ConfigResult, FaultCause, TransportError};

/// FC03 quantity limit
pub const MAX_READ_REGISTERS: u16 = 125;

// ============================================================================
// Channel configuration block
// ============================================================================

/// Layout of the `UnivChs[i]` configuration records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBlockLayout {
    /// Register of `UnivChs[0].ChDir`
    pub base: u16,
    /// Registers from one channel record to the next; `ChTyp` follows `ChDir`
    pub stride: u16,
}

impl ConfigBlockLayout {
    /// Registers spanned from `UnivChs[0].ChDir` to the last `ChTyp`
    pub fn register_count(&self) -> u32 {
        (CHANNEL_COUNT as u32 - 1) * u32::from(self.stride) + 2
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.stride < 2 {
            return Err(ConfigError::block(
                "config",
                format!("stride {} leaves no room for ChDir and ChTyp", self.stride),
            ));
        }
        let count = self.register_count();
        if count > u32::from(MAX_READ_REGISTERS) {
            return Err(ConfigError::block(
                "config",
                format!("{count} registers exceed a single read ({MAX_READ_REGISTERS})"),
            ));
        }
        if u32::from(self.base) + count - 1 > u32::from(u16::MAX) {
            return Err(ConfigError::block(
                "config",
                format!("base {} runs past the register space", self.base),
            ));
        }
        Ok(())
    }

    /// `(ChDir, ChTyp)` of channel `index` within a block read from `base`
    fn record(&self, words: &[u16], index: usize) -> Option<(u16, u16)> {
        let offset = index * usize::from(self.stride);
        Some((*words.get(offset)?, *words.get(offset + 1)?))
    }
}

/// Compare the module's channel records against the descriptor.
///
/// Unused channels are skipped: whatever the module has there is never read.
/// A short block is a transport fault, a disagreeing record a config fault.
pub fn verify_channel_config(
    descriptor: &DeviceDescriptor,
    layout: &ConfigBlockLayout,
    words: &[u16],
) -> Result<(), FaultCause> {
    let expected = layout.register_count() as u16;
    if words.len() != usize::from(expected) {
        return Err(TransportError::from(CodecError::WordCount {
            expected,
            actual: words.len(),
        })
        .into());
    }

    for channel in descriptor.configured_channels() {
        let Some((found_direction, found_type)) = layout.record(words, channel.index) else {
            continue;
        };
        let expected_direction = channel.direction() as u16;
        let expected_type = channel.kind.code();
        if (found_direction, found_type) != (expected_direction, expected_type) {
            return Err(ConfigError::ModuleMismatch {
                channel: channel.index,
                expected_direction,
                expected_type,
                found_direction,
                found_type,
            }
            .into());
        }
    }
    Ok(())
}

// ============================================================================
// Error register block
// ============================================================================

/// Contiguous error registers polled every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBlock {
    pub start: u16,
    pub count: u16,
}

impl ErrorBlock {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.count == 0 || self.count > MAX_READ_REGISTERS {
            return Err(ConfigError::block(
                "error",
                format!("count {} not in 1-{MAX_READ_REGISTERS}", self.count),
            ));
        }
        if u32::from(self.start) + u32::from(self.count) - 1 > u32::from(u16::MAX) {
            return Err(ConfigError::block(
                "error",
                format!("start {} runs past the register space", self.start),
            ));
        }
        Ok(())
    }

    /// Non-zero registers as `(register, code)`
    pub fn active_errors(&self, words: &[u16]) -> Result<Vec<(u16, u16)>, CodecError> {
        if words.len() != usize::from(self.count) {
            return Err(CodecError::WordCount {
                expected: self.count,
                actual: words.len(),
            });
        }
        Ok(words
            .iter()
            .enumerate()
            .filter(|(_, code)| **code != 0)
            .map(|(i, code)| (self.start + i as u16, *code))
            .collect())
    }
}

/// Data map tag of the error block
pub const ERROR_BLOCK_TAG: &str = "IoErrors";

/// Data map tag of the channel configuration block
pub const CONFIG_BLOCK_TAG: &str = "UnivChs";
