//! CPCOE I/O expansion driver
//!
//! Modbus RTU master for CPCOE universal I/O modules: describes the module
//! wiring, plans the holding register reads it implies, decodes the returned
//! words into engineering values and keeps polling across bus faults.
//!
//! # Architecture
//!
//! ```text
//! cpcoe-link
//!     ├── catalog     (channel types, decode rules, register layout)
//!     ├── descriptor  (validated bus address + serial line + wiring)
//!     ├── planner     (descriptor -> ordered RegisterChunks)
//!     ├── blocks      (module config read-back, error registers)
//!     ├── session     (TransportSession trait, RtuSession over tokio-modbus)
//!     ├── codec       (register words -> ReadingValue)
//!     ├── poller      (Connecting/Polling/Error/Closed state machine)
//!     └── runtime     (one task per device, stop handles)
//! ```
//!
//! Readings and faults leave the poller on separate `mpsc` channels; what
//! consumes them is up to the caller.

pub mod blocks;
pub mod catalog;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod planner;
pub mod poller;
pub mod reading;
pub mod runtime;
pub mod session;

pub use blocks::{verify_channel_config, ConfigBlockLayout, ErrorBlock, MAX_READ_REGISTERS};
pub use catalog::{
    ChannelDirection, ChannelKind, DecodeRule, EncodeRule, InputChannelType, OutputChannelType,
    Unit, CHANNEL_COUNT,
};
pub use descriptor::{ChannelConfig, DeviceDescriptor, Parity, SerialParams, WiringEntry};
pub use error::{
    CodecError, ConfigError, ConfigResult, FaultCause, TransportError, TransportResult,
};
pub use planner::{plan_register_map, RegisterChunk};
pub use poller::{BackoffPolicy, Poller, PollerConfig, PollerState};
pub use reading::{DecodedReading, ReadFault, ReadingValue};
pub use runtime::{spawn_device, spawn_rtu_device, DeviceHandle};
pub use session::{RtuSession, TransportSession};
