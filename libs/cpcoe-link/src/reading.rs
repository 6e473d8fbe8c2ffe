//! Records emitted by the poller
//!
//! Readings go to the data channel, faults to a separate error channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::catalog::Unit;
use crate::error::FaultCause;

/// Typed channel value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Float(f32),
    Bool(bool),
    Raw(u16),
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Float(v) => write!(f, "{v:.2}"),
            ReadingValue::Bool(v) => write!(f, "{}", if *v { "on" } else { "off" }),
            ReadingValue::Raw(v) => write!(f, "{v}"),
        }
    }
}

/// One decoded channel value from one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedReading {
    pub device: String,
    pub source_tag: String,
    pub channel_index: usize,
    pub value: ReadingValue,
    pub unit: Unit,
    pub timestamp: DateTime<Utc>,
}

/// A failed read, or a problem the module itself reported
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFault {
    pub device: String,
    pub source_tag: String,
    /// `None` for faults on the configuration or error blocks
    pub channel_index: Option<usize>,
    pub error: FaultCause,
    /// Link failures in a row when this fault was raised
    pub consecutive_link_errors: u32,
    pub timestamp: DateTime<Utc>,
}
