//! Channel type catalog
//!
//! Static tables describing what a CPCOE universal channel can be wired as,
//! how its holding registers are decoded, and where those registers live.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConfigError, ConfigResult};

// ============================================================================
// Module register layout
// ============================================================================

/// Number of universal channels on the module
pub const CHANNEL_COUNT: usize = 10;

/// First holding register of the universal channel value block (`UnivChsVals[0]`)
pub const UNIV_VALUES_BASE: u16 = 49;

/// Registers reserved per channel in the value block
pub const UNIV_VALUE_SLOT: u16 = 2;

/// Start register of a channel's value slot
pub fn channel_value_register(index: usize) -> u16 {
    UNIV_VALUES_BASE + (index as u16) * UNIV_VALUE_SLOT
}

// ============================================================================
// Direction
// ============================================================================

/// Universal channel direction (`ChDir` on the module)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelDirection {
    Input = 0,
    Output = 1,
}

impl fmt::Display for ChannelDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelDirection::Input => write!(f, "input"),
            ChannelDirection::Output => write!(f, "output"),
        }
    }
}

// ============================================================================
// Units and decode rules
// ============================================================================

/// Physical unit of a decoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "V")]
    Volt,
    #[serde(rename = "mA")]
    MilliAmp,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "state")]
    State,
    #[serde(rename = "count")]
    Count,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Celsius => "°C",
            Unit::Volt => "V",
            Unit::MilliAmp => "mA",
            Unit::Percent => "%",
            Unit::State => "state",
            Unit::Count => "count",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// How a channel's registers turn into a value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeRule {
    /// IEEE-754 single precision, high word first
    Float32,
    /// Signed 16-bit count: `raw * scale + offset`
    Linear { scale: f32, offset: f32 },
    /// Piecewise-linear curve over the unsigned raw count, ascending by raw
    Lookup(&'static [(u16, f32)]),
    /// Non-zero register means active
    Boolean,
    /// Unconverted register count
    Raw,
}

impl DecodeRule {
    /// Number of holding registers the rule consumes
    pub fn width(&self) -> u16 {
        match self {
            DecodeRule::Float32 => 2,
            DecodeRule::Linear { .. }
            | DecodeRule::Lookup(_)
            | DecodeRule::Boolean
            | DecodeRule::Raw => 1,
        }
    }
}

/// Scaling used when commanding an output channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeRule {
    /// Engineering units per register step
    pub scale: f32,
    pub min: f32,
    pub max: f32,
}

impl EncodeRule {
    /// Register value for an engineering value, clamped to the output range
    pub fn encode(&self, value: f32) -> u16 {
        let clamped = value.clamp(self.min, self.max);
        (clamped / self.scale).round() as u16
    }

    /// Rule used to read back the commanded value
    pub fn readback(&self) -> DecodeRule {
        DecodeRule::Linear {
            scale: self.scale,
            offset: 0.0,
        }
    }
}

// ============================================================================
// Thermistor curves
// ============================================================================

/// 10k NTC (B3435), raw count in 10 ohm steps
pub static NTC_10K_CURVE: &[(u16, f32)] = &[
    (97, 100.0),
    (127, 90.0),
    (167, 80.0),
    (223, 70.0),
    (302, 60.0),
    (416, 50.0),
    (583, 40.0),
    (831, 30.0),
    (1000, 25.0),
    (1209, 20.0),
    (1796, 10.0),
    (2728, 0.0),
    (4247, -10.0),
    (6777, -20.0),
];

/// 50k high temperature NTC (0-150 °C), raw count in 10 ohm steps
pub static NTC_HT_CURVE: &[(u16, f32)] = &[
    (84, 150.0),
    (160, 125.0),
    (330, 100.0),
    (732, 75.0),
    (1795, 50.0),
    (5000, 25.0),
    (16180, 0.0),
];

/// Silicon PTC (KTY81-110 class), raw count in ohms
pub static PTC_CURVE: &[(u16, f32)] = &[
    (567, -40.0),
    (684, -20.0),
    (815, 0.0),
    (961, 20.0),
    (1000, 25.0),
    (1122, 40.0),
    (1299, 60.0),
    (1490, 80.0),
    (1696, 100.0),
    (1915, 120.0),
    (2211, 150.0),
];

// ============================================================================
// Input types
// ============================================================================

/// Sensor kinds a universal channel accepts as input (`ChTyp` codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum InputChannelType {
    Ntc = 0,
    Pt1000 = 1,
    Analog0To1V = 2,
    Analog0To10V = 3,
    Analog4To20mA = 4,
    DigitalInput = 5,
    Analog0To5V = 6,
    Ntc0To150 = 7,
    NtcTempPress = 11,
    PtcR = 34,
    Pt500 = 35,
    Pt100 = 36,
    Analog0To20V = 42,
    NotUsed = 255,
}

const MILLI: DecodeRule = DecodeRule::Linear {
    scale: 0.001,
    offset: 0.0,
};

impl InputChannelType {
    pub const ALL: [InputChannelType; 14] = [
        InputChannelType::Ntc,
        InputChannelType::Pt1000,
        InputChannelType::Analog0To1V,
        InputChannelType::Analog0To10V,
        InputChannelType::Analog4To20mA,
        InputChannelType::DigitalInput,
        InputChannelType::Analog0To5V,
        InputChannelType::Ntc0To150,
        InputChannelType::NtcTempPress,
        InputChannelType::PtcR,
        InputChannelType::Pt500,
        InputChannelType::Pt100,
        InputChannelType::Analog0To20V,
        InputChannelType::NotUsed,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode rule, `None` for an unconfigured channel
    pub fn decode_rule(self) -> Option<DecodeRule> {
        use InputChannelType::*;
        match self {
            Pt100 | Pt500 | Pt1000 => Some(DecodeRule::Float32),
            Ntc => Some(DecodeRule::Lookup(NTC_10K_CURVE)),
            Ntc0To150 => Some(DecodeRule::Lookup(NTC_HT_CURVE)),
            PtcR => Some(DecodeRule::Lookup(PTC_CURVE)),
            NtcTempPress => Some(DecodeRule::Raw),
            Analog0To1V | Analog0To5V | Analog0To10V | Analog0To20V | Analog4To20mA => {
                Some(MILLI)
            },
            DigitalInput => Some(DecodeRule::Boolean),
            NotUsed => None,
        }
    }

    pub fn unit(self) -> Option<Unit> {
        use InputChannelType::*;
        match self {
            Ntc | Ntc0To150 | PtcR | Pt100 | Pt500 | Pt1000 => Some(Unit::Celsius),
            Analog0To1V | Analog0To5V | Analog0To10V | Analog0To20V => Some(Unit::Volt),
            Analog4To20mA => Some(Unit::MilliAmp),
            DigitalInput => Some(Unit::State),
            NtcTempPress => Some(Unit::Count),
            NotUsed => None,
        }
    }

    pub fn is_used(self) -> bool {
        self != InputChannelType::NotUsed
    }
}

impl TryFrom<u16> for InputChannelType {
    type Error = ConfigError;

    fn try_from(code: u16) -> ConfigResult<Self> {
        InputChannelType::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(ConfigError::UnknownType {
                direction: ChannelDirection::Input,
                code,
            })
    }
}

// ============================================================================
// Output types
// ============================================================================

/// Actuator kinds a universal channel drives as output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OutputChannelType {
    Out0To10V = 0,
    /// PWM, 100 Hz class
    PwmLowFreq = 3,
    /// PWM, 2 kHz class
    PwmHighFreq = 5,
}

impl OutputChannelType {
    pub const ALL: [OutputChannelType; 3] = [
        OutputChannelType::Out0To10V,
        OutputChannelType::PwmLowFreq,
        OutputChannelType::PwmHighFreq,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn encode_rule(self) -> EncodeRule {
        match self {
            OutputChannelType::Out0To10V => EncodeRule {
                scale: 0.001,
                min: 0.0,
                max: 10.0,
            },
            OutputChannelType::PwmLowFreq | OutputChannelType::PwmHighFreq => EncodeRule {
                scale: 0.1,
                min: 0.0,
                max: 100.0,
            },
        }
    }

    pub fn decode_rule(self) -> DecodeRule {
        self.encode_rule().readback()
    }

    pub fn unit(self) -> Unit {
        match self {
            OutputChannelType::Out0To10V => Unit::Volt,
            OutputChannelType::PwmLowFreq | OutputChannelType::PwmHighFreq => Unit::Percent,
        }
    }

    pub fn pwm_frequency_hz(self) -> Option<u32> {
        match self {
            OutputChannelType::Out0To10V => None,
            OutputChannelType::PwmLowFreq => Some(100),
            OutputChannelType::PwmHighFreq => Some(2000),
        }
    }
}

impl TryFrom<u16> for OutputChannelType {
    type Error = ConfigError;

    fn try_from(code: u16) -> ConfigResult<Self> {
        OutputChannelType::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(ConfigError::UnknownType {
                direction: ChannelDirection::Output,
                code,
            })
    }
}

// ============================================================================
// Channel kind
// ============================================================================

/// Validated channel type; the direction is implied by the variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Input(InputChannelType),
    Output(OutputChannelType),
}

impl ChannelKind {
    /// Resolve a raw type code against the enum of the given direction
    pub fn resolve(direction: ChannelDirection, code: u16) -> ConfigResult<Self> {
        match direction {
            ChannelDirection::Input => InputChannelType::try_from(code).map(ChannelKind::Input),
            ChannelDirection::Output => OutputChannelType::try_from(code).map(ChannelKind::Output),
        }
    }

    pub fn direction(&self) -> ChannelDirection {
        match self {
            ChannelKind::Input(_) => ChannelDirection::Input,
            ChannelKind::Output(_) => ChannelDirection::Output,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ChannelKind::Input(t) => t.code(),
            ChannelKind::Output(t) => t.code(),
        }
    }

    /// Decode rule and unit, `None` when the channel is not used
    pub fn decoding(&self) -> Option<(DecodeRule, Unit)> {
        match self {
            ChannelKind::Input(t) => t.decode_rule().zip(t.unit()),
            ChannelKind::Output(t) => Some((t.decode_rule(), t.unit())),
        }
    }

    pub fn is_used(&self) -> bool {
        match self {
            ChannelKind::Input(t) => t.is_used(),
            ChannelKind::Output(_) => true,
        }
    }
}
