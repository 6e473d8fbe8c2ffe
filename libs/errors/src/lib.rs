//! Unified error handling for the I/O service
//!
//! Driver-level failures (bad wiring, link faults) have their own types in
//! `cpcoe-link`; this crate covers what the service itself can fail on while
//! loading configuration and bringing devices up.

use thiserror::Error;

// ============================================================================
// IoSrvError - Main error type
// ============================================================================

/// Main error type for the I/O service
#[derive(Debug, Error)]
pub enum IoSrvError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    // ======================================
    // Device Errors
    // ======================================
    #[error("Device {device}: {reason}")]
    Device { device: String, reason: String },

    #[error("Duplicate device: {0}")]
    DuplicateDevice(String),

    // ======================================
    // Serialization Errors
    // ======================================
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // System Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type alias using IoSrvError
pub type IoSrvResult<T> = Result<T, IoSrvError>;

impl IoSrvError {
    /// Build an `InvalidConfig` error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a `Device` error from any displayable cause
    pub fn device(device: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Device {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error comes from the configuration rather than the runtime
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::InvalidConfig { .. }
                | Self::MissingConfig(_)
                | Self::FileNotFound(_)
                | Self::Device { .. }
                | Self::DuplicateDevice(_)
        )
    }

    /// Process exit code: 2 for configuration problems, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_config_error() {
            2
        } else {
            1
        }
    }

    /// Stable machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::Device { .. } => "DEVICE_ERROR",
            Self::DuplicateDevice(_) => "DUPLICATE_DEVICE",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Runtime(_) => "RUNTIME_ERROR",
        }
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for IoSrvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IoSrvError::invalid_config("devices[0].bus_address", "must be 1-247");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: devices[0].bus_address: must be 1-247"
        );

        let err = IoSrvError::device("boiler", "Channel 4: missing");
        assert_eq!(err.to_string(), "Device boiler: Channel 4: missing");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(IoSrvError::MissingConfig("devices".into()).exit_code(), 2);
        assert_eq!(IoSrvError::DuplicateDevice("a".into()).exit_code(), 2);
        assert_eq!(IoSrvError::Runtime("join".into()).exit_code(), 1);

        let io = std::io::Error::other("boom");
        assert_eq!(IoSrvError::from(io).exit_code(), 1);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            IoSrvError::Configuration("bad".into()).error_code(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(
            IoSrvError::invalid_config("backoff", "x").error_code(),
            "INVALID_CONFIG"
        );

        let json_err = serde_json::from_str::<u32>("x").unwrap_err();
        assert_eq!(
            IoSrvError::from(json_err).error_code(),
            "SERIALIZATION_ERROR"
        );
    }
}
