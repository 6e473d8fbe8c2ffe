//! CPCOE Link Error Types
//!
//! Two families: configuration errors (fatal, raised before polling starts)
//! and transport errors (transient, raised per read and recovered by the poller).

use std::time::Duration;
use thiserror::Error;

use crate::catalog::ChannelDirection;

/// Result type for descriptor and catalog operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type for transport session operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Startup-time configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A wiring entry is malformed or inconsistent with the module
    #[error("Invalid configuration for channel {channel}: {reason}")]
    InvalidConfiguration { channel: usize, reason: String },

    /// Type code outside the enumerated set for its direction
    #[error("Unknown {direction} channel type code: {code}")]
    UnknownType {
        direction: ChannelDirection,
        code: u16,
    },

    /// Bus address outside 1..=247
    #[error("Invalid bus address: {0} (must be 1-247)")]
    InvalidAddress(u8),

    /// Unsupported serial line setting
    #[error("Invalid serial parameters: {0}")]
    InvalidSerial(String),

    /// Auxiliary register block does not fit a single read
    #[error("Invalid {block} block: {reason}")]
    InvalidBlock { block: &'static str, reason: String },

    /// The module's own channel configuration disagrees with the wiring
    #[error(
        "Channel {channel} mismatch: module has ChDir={found_direction} ChTyp={found_type}, \
         wiring expects ChDir={expected_direction} ChTyp={expected_type}"
    )]
    ModuleMismatch {
        channel: usize,
        expected_direction: u16,
        expected_type: u16,
        found_direction: u16,
        found_type: u16,
    },
}

impl ConfigError {
    pub fn invalid_channel(channel: usize, reason: impl Into<String>) -> Self {
        ConfigError::InvalidConfiguration {
            channel,
            reason: reason.into(),
        }
    }

    pub fn serial(msg: impl Into<String>) -> Self {
        ConfigError::InvalidSerial(msg.into())
    }

    pub fn block(block: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidBlock {
            block,
            reason: reason.into(),
        }
    }
}

/// Per-read transport failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Serial link unusable (port missing, closed, broken)
    #[error("Link error: {0}")]
    Link(String),

    /// No complete response within the read timeout
    #[error("Timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Corrupt or mismatched response frame
    #[error("CRC/frame error: {0}")]
    Crc(String),

    /// Slave answered with a Modbus exception response
    #[error("Exception response: code 0x{0:02X}")]
    Exception(u8),
}

impl TransportError {
    pub fn link(msg: impl Into<String>) -> Self {
        TransportError::Link(msg.into())
    }

    pub fn crc(msg: impl Into<String>) -> Self {
        TransportError::Crc(msg.into())
    }

    /// Whether this failure points at the link itself rather than a single bad frame.
    /// Repeated link failures escalate the poller into a full reconnect.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, TransportError::Link(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout(Duration::ZERO),
            // The RTU codec reports checksum mismatches as invalid data
            std::io::ErrorKind::InvalidData => TransportError::Crc(err.to_string()),
            _ => TransportError::Link(err.to_string()),
        }
    }
}

/// Register payload could not be decoded
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Expected {expected} registers, got {actual}")]
    WordCount { expected: u16, actual: usize },
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        TransportError::Crc(err.to_string())
    }
}

/// Why a fault record was raised
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FaultCause {
    /// A read failed or returned an unusable frame
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The module is configured differently from the descriptor (fatal)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The module flagged an error in its error register block
    #[error("Module error register {register}: 0x{code:04X}")]
    Module { register: u16, code: u16 },
}

impl FaultCause {
    pub fn is_link_failure(&self) -> bool {
        matches!(self, FaultCause::Transport(e) if e.is_link_failure())
    }
}
