//! Register map planner
//!
//! Turns a validated descriptor into the ordered list of holding register
//! reads needed each poll cycle. Pure; re-run only when the descriptor changes.

use crate::catalog::{channel_value_register, DecodeRule, Unit};
use crate::descriptor::DeviceDescriptor;

/// Contiguous register range that decodes into exactly one channel value
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterChunk {
    /// Data map name of the value, e.g. `UnivChsVals[9]`
    pub source_tag: String,
    pub channel_index: usize,
    pub start_register: u16,
    pub register_count: u16,
    pub rule: DecodeRule,
    pub unit: Unit,
}

impl RegisterChunk {
    /// Last register covered by this chunk (inclusive)
    pub fn end_register(&self) -> u16 {
        self.start_register + self.register_count - 1
    }
}

/// Data map tag of a universal channel value
pub fn value_tag(index: usize) -> String {
    format!("UnivChsVals[{index}]")
}

/// Plan one chunk per configured channel, ascending by register address.
///
/// Channels are laid out in fixed slots, so ascending channel index gives
/// ascending, non-overlapping chunks. Unused channels are skipped and no
/// chunk spans their slot.
pub fn plan_register_map(descriptor: &DeviceDescriptor) -> Vec<RegisterChunk> {
    let mut chunks = Vec::with_capacity(descriptor.channels().len());

    for channel in descriptor.configured_channels() {
        let Some((rule, unit)) = channel.kind.decoding() else {
            continue;
        };
        chunks.push(RegisterChunk {
            source_tag: value_tag(channel.index),
            channel_index: channel.index,
            start_register: channel_value_register(channel.index),
            register_count: rule.width(),
            rule,
            unit,
        });
    }

    chunks.sort_by_key(|c| c.start_register);
    chunks
}
