//! Register codec
//!
//! Decodes raw holding register words into typed channel values.

use tracing::trace;

use crate::catalog::DecodeRule;
use crate::error::CodecError;
use crate::planner::RegisterChunk;
use crate::reading::ReadingValue;

/// Assemble an IEEE-754 float from two registers, high word first.
///
/// This word order is the module's wire format: `[0x4248, 0x0000]` is `50.0`.
pub fn decode_float32(high: u16, low: u16) -> f32 {
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// Split a float into two registers, high word first
pub fn encode_float32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

/// Piecewise-linear interpolation over a curve sorted ascending by raw count.
/// Values outside the curve clamp to the nearest end point.
pub fn interpolate(curve: &[(u16, f32)], raw: u16) -> f32 {
    let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
        return f32::NAN;
    };
    if raw <= first.0 {
        return first.1;
    }
    if raw >= last.0 {
        return last.1;
    }

    // First point strictly above raw; raw lies in [lo, hi)
    let upper = curve.partition_point(|&(r, _)| r <= raw);
    let (r0, v0) = curve[upper - 1];
    let (r1, v1) = curve[upper];
    let t = f32::from(raw - r0) / f32::from(r1 - r0);
    v0 + t * (v1 - v0)
}

/// Decode a register payload with a single rule
pub fn decode_registers(rule: &DecodeRule, registers: &[u16]) -> Result<ReadingValue, CodecError> {
    let expected = rule.width();
    if registers.len() != usize::from(expected) {
        return Err(CodecError::WordCount {
            expected,
            actual: registers.len(),
        });
    }

    let value = match *rule {
        DecodeRule::Float32 => {
            let v = decode_float32(registers[0], registers[1]);
            trace!(
                "Decoded float32: registers=[0x{:04X}, 0x{:04X}], value={}",
                registers[0],
                registers[1],
                v
            );
            ReadingValue::Float(v)
        },
        DecodeRule::Linear { scale, offset } => {
            let raw = registers[0] as i16;
            let v = f32::from(raw) * scale + offset;
            trace!("Decoded linear: raw={}, value={}", raw, v);
            ReadingValue::Float(v)
        },
        DecodeRule::Lookup(curve) => {
            let v = interpolate(curve, registers[0]);
            trace!("Decoded lookup: raw={}, value={}", registers[0], v);
            ReadingValue::Float(v)
        },
        DecodeRule::Boolean => ReadingValue::Bool(registers[0] != 0),
        DecodeRule::Raw => ReadingValue::Raw(registers[0]),
    };
    Ok(value)
}

/// Decode the payload returned for a planned chunk
pub fn decode_chunk(chunk: &RegisterChunk, registers: &[u16]) -> Result<ReadingValue, CodecError> {
    if registers.len() != usize::from(chunk.register_count) {
        return Err(CodecError::WordCount {
            expected: chunk.register_count,
            actual: registers.len(),
        });
    }
    decode_registers(&chunk.rule, registers)
}
