//! Per-device task lifecycle
//!
//! Each device runs its own poller task. Devices share nothing; the only
//! coordination is the handle used to stop them.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::descriptor::DeviceDescriptor;
use crate::poller::{Poller, PollerConfig, PollerState};
use crate::reading::{DecodedReading, ReadFault};
use crate::session::{RtuSession, TransportSession};

/// Running device poller
#[derive(Debug)]
pub struct DeviceHandle<S> {
    name: String,
    cancel: CancellationToken,
    state: watch::Receiver<PollerState>,
    join: JoinHandle<S>,
}

impl<S: Send + 'static> DeviceHandle<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest published state
    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the poller and wait for it to close its session.
    /// Returns the session, or `None` if the task panicked.
    pub async fn stop(self) -> Option<S> {
        self.cancel.cancel();
        match self.join.await {
            Ok(session) => {
                info!("Device {} stopped", self.name);
                Some(session)
            },
            Err(e) => {
                error!("Device {} task failed: {}", self.name, e);
                None
            },
        }
    }
}

/// Spawn a poller onto the runtime. `cancel` may be a child of a
/// service-wide token so one signal stops every device.
pub fn spawn_device<S>(poller: Poller<S>, cancel: CancellationToken) -> DeviceHandle<S>
where
    S: TransportSession + 'static,
{
    let name = poller.descriptor().name().to_string();
    let state = poller.subscribe_state();
    let task_token = cancel.clone();
    let join = tokio::spawn(poller.run(task_token));

    DeviceHandle {
        name,
        cancel,
        state,
        join,
    }
}

/// Spawn a poller over a local serial port
pub fn spawn_rtu_device(
    descriptor: Arc<DeviceDescriptor>,
    config: PollerConfig,
    readings: mpsc::Sender<DecodedReading>,
    faults: mpsc::Sender<ReadFault>,
    cancel: CancellationToken,
) -> DeviceHandle<RtuSession> {
    let session = RtuSession::new(&descriptor);
    let poller = Poller::new(descriptor, session, config, readings, faults);
    spawn_device(poller, cancel)
}
