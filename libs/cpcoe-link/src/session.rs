//! Transport session
//!
//! The boundary between the poller and the bus. A session owns the serial
//! link and the Modbus client bound to one slave address.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, Client as _, Context, Reader as _};
use tokio_modbus::Slave;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info};

use crate::descriptor::{DeviceDescriptor, Parity, SerialParams};
use crate::error::{TransportError, TransportResult};

/// Blocking-read capability the poller drives.
///
/// Implementations must fail reads on a closed session instead of panicking,
/// and `close` must be safe to call more than once.
#[async_trait]
pub trait TransportSession: Send {
    /// Open the link
    async fn open(&mut self) -> TransportResult<()>;

    /// Read `count` holding registers starting at `address` (FC03)
    async fn read_holding_registers(&mut self, address: u16, count: u16)
        -> TransportResult<Vec<u16>>;

    /// Release the link
    async fn close(&mut self);
}

/// Modbus RTU session over a local serial port
pub struct RtuSession {
    serial: SerialParams,
    slave: Slave,
    read_timeout: Duration,
    ctx: Option<Context>,
}

impl std::fmt::Debug for RtuSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuSession")
            .field("port", &self.serial.port)
            .field("slave", &self.slave)
            .field("read_timeout", &self.read_timeout)
            .field("open", &self.ctx.is_some())
            .finish()
    }
}

impl RtuSession {
    pub fn new(descriptor: &DeviceDescriptor) -> Self {
        Self {
            serial: descriptor.serial().clone(),
            slave: Slave(descriptor.bus_address()),
            read_timeout: descriptor.serial().effective_read_timeout(),
            ctx: None,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    fn port_builder(&self) -> tokio_serial::SerialPortBuilder {
        let parity = match self.serial.parity {
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::None => tokio_serial::Parity::None,
        };

        let data_bits = match self.serial.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let stop_bits = match self.serial.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        tokio_serial::new(&self.serial.port, self.serial.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(self.read_timeout)
    }
}

#[async_trait]
impl TransportSession for RtuSession {
    async fn open(&mut self) -> TransportResult<()> {
        if self.ctx.is_some() {
            self.close().await;
        }

        debug!(
            "RTU: {} @{}baud slave={}",
            self.serial.port, self.serial.baud_rate, self.slave.0
        );

        match self.port_builder().open_native_async() {
            Ok(stream) => {
                info!("RTU opened: {}", self.serial.port);
                self.ctx = Some(rtu::attach_slave(stream, self.slave));
                Ok(())
            },
            Err(e) => {
                error!("RTU err: {} - {}", self.serial.port, e);
                Err(TransportError::link(format!(
                    "Failed to open serial port {}: {e}",
                    self.serial.port
                )))
            },
        }
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| TransportError::link("Not connected"))?;

        match timeout(self.read_timeout, ctx.read_holding_registers(address, count)).await {
            Ok(Ok(Ok(words))) => {
                debug!("RTU RX: addr={} {} regs", address, words.len());
                Ok(words)
            },
            Ok(Ok(Err(exception))) => Err(TransportError::Exception(u8::from(exception))),
            Ok(Err(tokio_modbus::Error::Transport(e))) => Err(match TransportError::from(e) {
                TransportError::Timeout(_) => TransportError::Timeout(self.read_timeout),
                other => other,
            }),
            Ok(Err(e)) => Err(TransportError::crc(e.to_string())),
            Err(_) => Err(TransportError::Timeout(self.read_timeout)),
        }
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!("RTU disconnect: {}", e);
            }
            info!("RTU closed: {}", self.serial.port);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::catalog::CHANNEL_COUNT;
    use crate::descriptor::WiringEntry;
    use tracing_test::traced_test;

    fn descriptor(port: &str, read_timeout_ms: u64) -> DeviceDescriptor {
        let mut serial = SerialParams::new(port);
        serial.read_timeout_ms = read_timeout_ms;
        let wiring: Vec<WiringEntry> = (0..CHANNEL_COUNT).map(WiringEntry::unused).collect();
        DeviceDescriptor::new("cpcoe-test", 2, serial, &wiring).unwrap()
    }

    #[test]
    fn test_session_uses_effective_timeout() {
        let session = RtuSession::new(&descriptor("/dev/ttyUSB0", 1));
        assert_eq!(
            session.read_timeout(),
            descriptor("/dev/ttyUSB0", 1)
                .serial()
                .minimum_read_timeout()
        );
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_read_on_closed_session_is_link_error() {
        let mut session = RtuSession::new(&descriptor("/dev/ttyUSB0", 5000));
        let err = session.read_holding_registers(67, 2).await.unwrap_err();
        assert!(err.is_link_failure());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_open_missing_port_is_link_error() {
        let mut session = RtuSession::new(&descriptor("/dev/cpcoe-does-not-exist", 5000));
        let err = session.open().await.unwrap_err();
        assert!(err.is_link_failure());
        assert!(!session.is_open());

        // close on a never-opened session is a no-op
        session.close().await;
        session.close().await;
        assert!(logs_contain("RTU err"));
    }
}
