//! Test Common Utilities
//!
//! Scripted transport session and descriptor helpers for poller tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use cpcoe_link::{
    ConfigBlockLayout, DecodedReading, DeviceDescriptor, ErrorBlock, InputChannelType,
    OutputChannelType, PollerConfig, ReadFault, SerialParams, TransportError, TransportResult,
    TransportSession, WiringEntry, CHANNEL_COUNT,
};

/// Decides the outcome of one read: (session generation, address, count)
pub type Responder = Box<dyn FnMut(u32, u16, u16) -> TransportResult<Vec<u16>> + Send>;

/// Call counters shared between the test and the session it handed away
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub opens: Arc<AtomicU32>,
    pub closes: Arc<AtomicU32>,
    pub reads: Arc<AtomicU32>,
    pub addresses: Arc<Mutex<Vec<u16>>>,
}

impl Counters {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn addresses(&self) -> Vec<u16> {
        self.addresses.lock().unwrap().clone()
    }
}

/// Mock transport session driven by a responder closure
pub struct MockSession {
    counters: Counters,
    responder: Responder,
    /// Number of initial `open` calls that fail
    failing_opens: u32,
    /// Cancel this token and block on the given read number (1-based)
    stop_at_read: Option<(u32, CancellationToken)>,
    /// Every read blocks forever after signalling here
    hang_reads: Option<Arc<Notify>>,
}

impl MockSession {
    pub fn new(responder: Responder) -> (Self, Counters) {
        let counters = Counters::default();
        let session = Self {
            counters: counters.clone(),
            responder,
            failing_opens: 0,
            stop_at_read: None,
            hang_reads: None,
        };
        (session, counters)
    }

    pub fn with_failing_opens(mut self, count: u32) -> Self {
        self.failing_opens = count;
        self
    }

    pub fn stop_at_read(mut self, read: u32, token: CancellationToken) -> Self {
        self.stop_at_read = Some((read, token));
        self
    }

    pub fn hang_reads(mut self, entered: Arc<Notify>) -> Self {
        self.hang_reads = Some(entered);
        self
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn open(&mut self) -> TransportResult<()> {
        let attempt = self.counters.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failing_opens {
            return Err(TransportError::link("No such file or directory"));
        }
        Ok(())
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        let read = self.counters.reads.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(entered) = &self.hang_reads {
            entered.notify_one();
            std::future::pending::<()>().await;
        }
        if let Some((at, token)) = &self.stop_at_read {
            if read >= *at {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }

        self.counters.addresses.lock().unwrap().push(address);
        let generation = self.counters.opens.load(Ordering::SeqCst);
        (self.responder)(generation, address, count)
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Three channels: PT100 at 49/50, digital input at 51, NTC at 53
pub fn three_channel_descriptor() -> Arc<DeviceDescriptor> {
    let mut wiring: Vec<WiringEntry> = (0..CHANNEL_COUNT).map(WiringEntry::unused).collect();
    wiring[0] = WiringEntry::input(0, InputChannelType::Pt100);
    wiring[1] = WiringEntry::input(1, InputChannelType::DigitalInput);
    wiring[2] = WiringEntry::input(2, InputChannelType::Ntc);
    descriptor(&wiring)
}

/// Mixed module with gaps and an output readback
pub fn sparse_descriptor() -> Arc<DeviceDescriptor> {
    let mut wiring: Vec<WiringEntry> = (0..CHANNEL_COUNT).map(WiringEntry::unused).collect();
    wiring[3] = WiringEntry::input(3, InputChannelType::Analog0To10V);
    wiring[6] = WiringEntry::output(6, OutputChannelType::Out0To10V);
    wiring[9] = WiringEntry::input(9, InputChannelType::Pt100);
    descriptor(&wiring)
}

pub fn descriptor(wiring: &[WiringEntry]) -> Arc<DeviceDescriptor> {
    Arc::new(DeviceDescriptor::new("cpcoe-test", 2, SerialParams::new("/dev/null"), wiring).unwrap())
}

/// Channel configuration records at 1, 5, 9, ... (ChDir, ChTyp, ActPrbMin...)
pub const CONFIG_LAYOUT: ConfigBlockLayout = ConfigBlockLayout { base: 1, stride: 4 };

/// Error registers 200-203
pub const ERROR_BLOCK: ErrorBlock = ErrorBlock {
    start: 200,
    count: 4,
};

/// `three_channel_descriptor` with the module config read-back enabled
pub fn checked_descriptor() -> Arc<DeviceDescriptor> {
    let desc = (*three_channel_descriptor()).clone();
    Arc::new(desc.with_config_block(CONFIG_LAYOUT).unwrap())
}

/// `three_channel_descriptor` with the error block polled
pub fn error_block_descriptor() -> Arc<DeviceDescriptor> {
    let desc = (*three_channel_descriptor()).clone();
    Arc::new(desc.with_error_block(ERROR_BLOCK).unwrap())
}

/// Config block as a module wired exactly like `descriptor` reports it
pub fn module_config_block(descriptor: &DeviceDescriptor) -> Vec<u16> {
    let mut words = vec![0u16; CONFIG_LAYOUT.register_count() as usize];
    let stride = usize::from(CONFIG_LAYOUT.stride);
    for channel in descriptor.channels() {
        words[channel.index * stride] = channel.direction() as u16;
        words[channel.index * stride + 1] = channel.kind.code();
    }
    words
}

/// Healthy module values for `three_channel_descriptor`
pub fn healthy(address: u16) -> TransportResult<Vec<u16>> {
    match address {
        49 => Ok(vec![0x4248, 0x0000]),
        51 => Ok(vec![1]),
        53 => Ok(vec![1000]),
        67 => Ok(vec![0x41AC, 0x0000]),
        other => Ok(vec![other; 1]),
    }
}

pub fn fast_config() -> PollerConfig {
    PollerConfig {
        poll_interval: Duration::from_millis(100),
        ..PollerConfig::default()
    }
}

pub struct Sinks {
    pub readings_tx: mpsc::Sender<DecodedReading>,
    pub readings_rx: mpsc::Receiver<DecodedReading>,
    pub faults_tx: mpsc::Sender<ReadFault>,
    pub faults_rx: mpsc::Receiver<ReadFault>,
}

pub fn sinks() -> Sinks {
    let (readings_tx, readings_rx) = mpsc::channel(256);
    let (faults_tx, faults_rx) = mpsc::channel(256);
    Sinks {
        readings_tx,
        readings_rx,
        faults_tx,
        faults_rx,
    }
}

pub fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}
