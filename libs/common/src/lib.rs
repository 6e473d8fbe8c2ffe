//! Shared service plumbing
//!
//! - logging setup
//! - shutdown signal handling
//! - CLI / environment / default value resolution

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use logging::{init_logging, LoggingOptions};
pub use shutdown::{cancel_on_shutdown, wait_for_shutdown};
