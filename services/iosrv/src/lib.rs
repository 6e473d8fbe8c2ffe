//! CPCOE I/O Service (`iosrv`)
//!
//! Loads device wiring from a config file and keeps every configured module
//! polled until shutdown.
//!
//! ```text
//! iosrv
//!     ├── bootstrap  (CLI, logging, --validate report)
//!     ├── config     (figment: defaults -> file -> IOSRV_ env)
//!     ├── service    (one poller per device, shared shutdown token)
//!     └── sink       (readings/faults -> log, JSON lines)
//! ```

pub mod bootstrap;
pub mod config;
pub mod service;
pub mod sink;

pub use config::IoSrvConfig;
pub use service::IoService;
pub use sink::{ReadingSink, SinkStats};
