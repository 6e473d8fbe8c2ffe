//! Reading and fault consumer
//!
//! Drains the channels every device poller writes to. Readings are logged and,
//! if enabled, written out as JSON lines; faults are logged.

use std::io::Write;

use cpcoe_link::{DecodedReading, ReadFault};
use errors::IoSrvResult;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Counts of what went through the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub readings: u64,
    pub faults: u64,
}

/// Serialize one reading as a single JSON line (no trailing newline)
pub fn reading_json(reading: &DecodedReading) -> IoSrvResult<String> {
    Ok(serde_json::to_string(reading)?)
}

pub struct ReadingSink<W> {
    json_out: Option<W>,
    stats: SinkStats,
}

impl ReadingSink<std::io::Stdout> {
    /// Sink printing JSON lines to stdout when `json_readings` is set
    pub fn stdout(json_readings: bool) -> Self {
        Self::new(json_readings.then(std::io::stdout))
    }
}

impl<W: Write> ReadingSink<W> {
    pub fn new(json_out: Option<W>) -> Self {
        Self {
            json_out,
            stats: SinkStats::default(),
        }
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub fn into_output(self) -> Option<W> {
        self.json_out
    }

    /// Consume until every sender of both channels is gone
    pub async fn run(
        mut self,
        mut readings: mpsc::Receiver<DecodedReading>,
        mut faults: mpsc::Receiver<ReadFault>,
    ) -> Self {
        let mut readings_open = true;
        let mut faults_open = true;

        while readings_open || faults_open {
            tokio::select! {
                r = readings.recv(), if readings_open => match r {
                    Some(reading) => self.on_reading(&reading),
                    None => readings_open = false,
                },
                f = faults.recv(), if faults_open => match f {
                    Some(fault) => self.on_fault(&fault),
                    None => faults_open = false,
                },
            }
        }

        info!(
            "Sink closed: {} readings, {} faults",
            self.stats.readings, self.stats.faults
        );
        self
    }

    fn on_reading(&mut self, reading: &DecodedReading) {
        self.stats.readings += 1;
        info!(
            "{} {} = {} {}",
            reading.device, reading.source_tag, reading.value, reading.unit
        );

        if let Some(out) = self.json_out.as_mut() {
            let written = reading_json(reading).and_then(|line| {
                writeln!(out, "{}", line)?;
                out.flush()?;
                Ok(())
            });
            if let Err(e) = written {
                warn!("JSON output disabled: {}", e);
                self.json_out = None;
            }
        }
    }

    fn on_fault(&mut self, fault: &ReadFault) {
        self.stats.faults += 1;
        match fault.channel_index {
            Some(channel) => warn!(
                "{} {} (ch {}) fault: {} [link errors: {}]",
                fault.device,
                fault.source_tag,
                channel,
                fault.error,
                fault.consecutive_link_errors
            ),
            None => warn!(
                "{} {} fault: {} [link errors: {}]",
                fault.device, fault.source_tag, fault.error, fault.consecutive_link_errors
            ),
        }
    }
}
