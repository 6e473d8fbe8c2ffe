//! Device fleet lifecycle
//!
//! One poller task per configured device plus one sink task. All pollers
//! hang off a single shutdown token.

use std::io::Write;
use std::sync::Arc;

use cpcoe_link::{
    spawn_device, DecodedReading, DeviceDescriptor, DeviceHandle, Poller, PollerConfig,
    PollerState, ReadFault, RtuSession, TransportSession,
};
use errors::{IoSrvError, IoSrvResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sink::{ReadingSink, SinkStats};

/// Buffered records per channel before pollers wait on the sink
pub const DATA_CHANNEL_CAPACITY: usize = 1024;

/// Running pollers and their sink
pub struct IoService<S, W> {
    devices: Vec<DeviceHandle<S>>,
    sink: JoinHandle<ReadingSink<W>>,
    shutdown: CancellationToken,
}

impl<S, W> IoService<S, W>
where
    S: TransportSession + 'static,
    W: Write + Send + 'static,
{
    /// Spawn the sink, then one poller per descriptor with a session from
    /// `make_session`
    pub fn start<F>(
        descriptors: &[Arc<DeviceDescriptor>],
        poller_config: PollerConfig,
        sink: ReadingSink<W>,
        shutdown: CancellationToken,
        mut make_session: F,
    ) -> Self
    where
        F: FnMut(&DeviceDescriptor) -> S,
    {
        let (readings_tx, readings_rx) = mpsc::channel::<DecodedReading>(DATA_CHANNEL_CAPACITY);
        let (faults_tx, faults_rx) = mpsc::channel::<ReadFault>(DATA_CHANNEL_CAPACITY);
        let sink = tokio::spawn(sink.run(readings_rx, faults_rx));

        let devices = descriptors
            .iter()
            .map(|descriptor| {
                let session = make_session(descriptor);
                let poller = Poller::new(
                    Arc::clone(descriptor),
                    session,
                    poller_config,
                    readings_tx.clone(),
                    faults_tx.clone(),
                );
                spawn_device(poller, shutdown.child_token())
            })
            .collect::<Vec<_>>();

        info!("Started {} devices", devices.len());

        Self {
            devices,
            sink,
            shutdown,
        }
    }

    pub fn device_states(&self) -> Vec<(String, PollerState)> {
        self.devices
            .iter()
            .map(|d| (d.name().to_string(), d.state()))
            .collect()
    }

    /// Stop every poller, then let the sink drain what they sent
    pub async fn stop(self) -> IoSrvResult<SinkStats> {
        self.shutdown.cancel();

        for device in self.devices {
            let name = device.name().to_string();
            if device.stop().await.is_none() {
                warn!("Device {} did not shut down cleanly", name);
            }
        }

        let sink = self
            .sink
            .await
            .map_err(|e| IoSrvError::Runtime(format!("Sink task failed: {}", e)))?;
        Ok(sink.stats())
    }
}

impl<W> IoService<RtuSession, W>
where
    W: Write + Send + 'static,
{
    /// Poll every device over its serial port
    pub fn start_rtu(
        descriptors: &[Arc<DeviceDescriptor>],
        poller_config: PollerConfig,
        sink: ReadingSink<W>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::start(descriptors, poller_config, sink, shutdown, RtuSession::new)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cpcoe_link::{
        InputChannelType, SerialParams, TransportError, TransportResult, WiringEntry,
        CHANNEL_COUNT,
    };
    use std::time::Duration;

    /// Module answering every read with a PT1000 at 20 °C
    struct FixedSession {
        fail_open: bool,
    }

    #[async_trait]
    impl TransportSession for FixedSession {
        async fn open(&mut self) -> TransportResult<()> {
            if self.fail_open {
                return Err(TransportError::link("No such device"));
            }
            Ok(())
        }

        async fn read_holding_registers(
            &mut self,
            _address: u16,
            _count: u16,
        ) -> TransportResult<Vec<u16>> {
            Ok(vec![0x41A0, 0x0000])
        }

        async fn close(&mut self) {}
    }

    fn descriptor(name: &str, port: &str) -> Arc<DeviceDescriptor> {
        let mut wiring: Vec<WiringEntry> = (0..CHANNEL_COUNT).map(WiringEntry::unused).collect();
        wiring[0] = WiringEntry::input(0, InputChannelType::Pt1000);
        Arc::new(DeviceDescriptor::new(name, 1, SerialParams::new(port), &wiring).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fleet_runs_and_stops() {
        let descriptors = vec![descriptor("good", "/dev/ttyA"), descriptor("bad", "/dev/ttyB")];
        let service = IoService::start(
            &descriptors,
            PollerConfig::default(),
            ReadingSink::new(Some(Vec::<u8>::new())),
            CancellationToken::new(),
            |d| FixedSession {
                fail_open: d.name() == "bad",
            },
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let states = service.device_states();
        assert_eq!(states[0], ("good".to_string(), PollerState::Polling));
        assert_eq!(states[1], ("bad".to_string(), PollerState::Connecting));

        let stats = service.stop().await.unwrap();
        // Cycles at t=0, 1s and 2s
        assert_eq!(stats.readings, 3);
        assert_eq!(stats.faults, 0);
    }

    #[tokio::test]
    async fn test_stop_with_no_devices() {
        let service = IoService::<FixedSession, Vec<u8>>::start(
            &[],
            PollerConfig::default(),
            ReadingSink::new(None),
            CancellationToken::new(),
            |_| FixedSession { fail_open: false },
        );
        let stats = service.stop().await.unwrap();
        assert_eq!(stats, SinkStats::default());
    }
}
