//! Decoder/poller state machine
//!
//! ```text
//!            open ok                link errors >= threshold
//! Connecting ───────▶ Polling ────────────────────────────▶ Error
//!     ▲  │ open err       │ ▲  per-chunk faults:             │
//!     │  └─ backoff ──┘   │ └─ report, skip, continue        │
//!     │                   │                                   │
//!     └───────────────────┼──────── close + backoff ──────────┘
//!                         │ cancel (from any state)
//!                         ▼
//!                       Closed  (session closed, loop ends)
//! ```
//!
//! One poller owns one transport session; reads are strictly sequential.
//!
//! When the descriptor carries a config block layout, the first cycle on each
//! connection reads the module's channel records back and stops the poller on
//! a mismatch. An error block, if configured, is read after the channel values
//! and every non-zero register becomes a fault.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blocks::{verify_channel_config, CONFIG_BLOCK_TAG, ERROR_BLOCK_TAG};
use crate::codec::decode_chunk;
use crate::descriptor::DeviceDescriptor;
use crate::error::{FaultCause, TransportError, TransportResult};
use crate::planner::{plan_register_map, RegisterChunk};
use crate::reading::{DecodedReading, ReadFault};
use crate::session::TransportSession;

/// Default delay between poll cycles (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Default number of consecutive link failures before a full reconnect
pub const DEFAULT_LINK_ERROR_THRESHOLD: u32 = 3;

// ============================================================================
// Configuration
// ============================================================================

/// Capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(30000),
        }
    }
}

impl BackoffPolicy {
    /// Delay following `current`: doubled, capped at `max`, never zero
    pub fn next(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(self.max)
            .max(Duration::from_millis(1))
    }

    fn first(&self) -> Duration {
        self.initial.min(self.max).max(Duration::from_millis(1))
    }
}

/// Poller behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub link_error_threshold: u32,
    pub backoff: BackoffPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            link_error_threshold: DEFAULT_LINK_ERROR_THRESHOLD,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Lifecycle state, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Connecting,
    Polling,
    Error,
    Closed,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PollerState::Connecting => "connecting",
            PollerState::Polling => "polling",
            PollerState::Error => "error",
            PollerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Read loop for one device
pub struct Poller<S> {
    descriptor: Arc<DeviceDescriptor>,
    plan: Arc<[RegisterChunk]>,
    session: S,
    config: PollerConfig,
    readings: mpsc::Sender<DecodedReading>,
    faults: mpsc::Sender<ReadFault>,
    state_tx: watch::Sender<PollerState>,
    consecutive_link_errors: u32,
    reconnect_delay: Duration,
    /// Module channel configuration checked on the current connection
    config_verified: bool,
}

impl<S: TransportSession> Poller<S> {
    /// Plan the register map and bind the session to the output sinks
    pub fn new(
        descriptor: Arc<DeviceDescriptor>,
        session: S,
        config: PollerConfig,
        readings: mpsc::Sender<DecodedReading>,
        faults: mpsc::Sender<ReadFault>,
    ) -> Self {
        let plan: Arc<[RegisterChunk]> = plan_register_map(&descriptor).into();
        let (state_tx, _) = watch::channel(PollerState::Connecting);
        Self {
            descriptor,
            plan,
            session,
            reconnect_delay: config.backoff.first(),
            config,
            readings,
            faults,
            state_tx,
            consecutive_link_errors: 0,
            config_verified: false,
        }
    }

    pub fn plan(&self) -> &[RegisterChunk] {
        &self.plan
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
        self.state_tx.subscribe()
    }

    /// Drive the state machine until `cancel` fires. The session is closed on
    /// the way out and handed back to the caller.
    pub async fn run(mut self, cancel: CancellationToken) -> S {
        info!(
            "Poller started: {} (slave {}, {} chunks, {}ms interval)",
            self.descriptor.name(),
            self.descriptor.bus_address(),
            self.plan.len(),
            self.config.poll_interval.as_millis()
        );

        let mut state = PollerState::Connecting;
        while state != PollerState::Closed {
            self.publish(state);
            state = match state {
                PollerState::Connecting => self.connect(&cancel).await,
                PollerState::Polling => self.poll_cycle(&cancel).await,
                PollerState::Error => self.recover(&cancel).await,
                PollerState::Closed => PollerState::Closed,
            };
        }

        self.session.close().await;
        self.publish(PollerState::Closed);
        info!("Poller stopped: {}", self.descriptor.name());
        self.session
    }

    fn publish(&self, state: PollerState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(
                "{}: {} -> {}",
                self.descriptor.name(),
                previous,
                state
            );
        }
    }

    /// Open the session, retrying with backoff
    async fn connect(&mut self, cancel: &CancellationToken) -> PollerState {
        let mut delay = self.config.backoff.first();
        let mut attempts: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollerState::Closed,
                r = self.session.open() => r,
            };

            match result {
                Ok(()) => {
                    self.config_verified = false;
                    info!(
                        "{}: connected (#{} attempts)",
                        self.descriptor.name(),
                        attempts + 1
                    );
                    return PollerState::Polling;
                },
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    warn!(
                        "{}: connect retry {} in {}ms: {}",
                        self.descriptor.name(),
                        attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return PollerState::Closed,
                        _ = sleep(delay) => {},
                    }
                    delay = self.config.backoff.next(delay);
                },
            }
        }
    }

    /// Read every planned chunk once, then wait out the poll interval
    async fn poll_cycle(&mut self, cancel: &CancellationToken) -> PollerState {
        if !self.config_verified {
            if let Some(next) = self.verify_module_config(cancel).await {
                return next;
            }
        }

        let plan = Arc::clone(&self.plan);
        let mut success_count = 0usize;
        let mut error_count = 0usize;

        for chunk in plan.iter() {
            let Some(result) = self
                .read(chunk.start_register, chunk.register_count, cancel)
                .await
            else {
                return PollerState::Closed;
            };

            let decoded = result
                .and_then(|words| decode_chunk(chunk, &words).map_err(TransportError::from));

            match decoded {
                Ok(value) => {
                    success_count += 1;
                    self.read_succeeded();

                    let reading = DecodedReading {
                        device: self.descriptor.name().to_string(),
                        source_tag: chunk.source_tag.clone(),
                        channel_index: chunk.channel_index,
                        value,
                        unit: chunk.unit,
                        timestamp: chrono::Utc::now(),
                    };
                    if !deliver(&self.readings, reading, cancel).await {
                        return PollerState::Closed;
                    }
                },
                Err(e) => {
                    error_count += 1;
                    warn!(
                        "{}: read {} @{}x{} failed: {}",
                        self.descriptor.name(),
                        chunk.source_tag,
                        chunk.start_register,
                        chunk.register_count,
                        e
                    );
                    let tag = chunk.source_tag.clone();
                    if let Some(next) = self
                        .report(tag, Some(chunk.channel_index), e.into(), cancel)
                        .await
                    {
                        return next;
                    }
                },
            }
        }

        if let Some(block) = self.descriptor.error_block().copied() {
            let Some(result) = self.read(block.start, block.count, cancel).await else {
                return PollerState::Closed;
            };
            let active =
                result.and_then(|words| block.active_errors(&words).map_err(TransportError::from));

            match active {
                Ok(errors) => {
                    self.read_succeeded();
                    for (register, code) in errors {
                        warn!(
                            "{}: module error @{}: 0x{:04X}",
                            self.descriptor.name(),
                            register,
                            code
                        );
                        let tag = format!("{}[{}]", ERROR_BLOCK_TAG, register - block.start);
                        let cause = FaultCause::Module { register, code };
                        if let Some(next) = self.report(tag, None, cause, cancel).await {
                            return next;
                        }
                    }
                },
                Err(e) => {
                    error_count += 1;
                    warn!(
                        "{}: read {} @{}x{} failed: {}",
                        self.descriptor.name(),
                        ERROR_BLOCK_TAG,
                        block.start,
                        block.count,
                        e
                    );
                    let tag = ERROR_BLOCK_TAG.to_string();
                    if let Some(next) = self.report(tag, None, e.into(), cancel).await {
                        return next;
                    }
                },
            }
        }

        debug!(
            "{}: poll completed: {} success, {} errors",
            self.descriptor.name(),
            success_count,
            error_count
        );

        self.wait_interval(cancel).await
    }

    /// Compare the module's channel configuration with the descriptor once per
    /// connection. `Some` ends the cycle early.
    async fn verify_module_config(&mut self, cancel: &CancellationToken) -> Option<PollerState> {
        let Some(layout) = self.descriptor.config_block().copied() else {
            self.config_verified = true;
            return None;
        };

        let count = layout.register_count() as u16;
        let Some(result) = self.read(layout.base, count, cancel).await else {
            return Some(PollerState::Closed);
        };
        let checked = match result {
            Ok(words) => {
                self.read_succeeded();
                verify_channel_config(&self.descriptor, &layout, &words)
            },
            Err(e) => Err(e.into()),
        };

        match checked {
            Ok(()) => {
                info!("{}: module config verified", self.descriptor.name());
                self.config_verified = true;
                None
            },
            Err(cause @ FaultCause::Config(_)) => {
                error!("{}: {}, stopping", self.descriptor.name(), cause);
                let tag = CONFIG_BLOCK_TAG.to_string();
                self.report(tag, None, cause, cancel).await;
                Some(PollerState::Closed)
            },
            Err(cause) => {
                warn!(
                    "{}: read {} @{}x{} failed: {}",
                    self.descriptor.name(),
                    CONFIG_BLOCK_TAG,
                    layout.base,
                    count,
                    cause
                );
                let tag = CONFIG_BLOCK_TAG.to_string();
                match self.report(tag, None, cause, cancel).await {
                    Some(next) => Some(next),
                    // Channels stay unread until the module config is confirmed
                    None => Some(self.wait_interval(cancel).await),
                }
            },
        }
    }

    /// One FC03 read; `None` when cancelled first
    async fn read(
        &mut self,
        address: u16,
        count: u16,
        cancel: &CancellationToken,
    ) -> Option<TransportResult<Vec<u16>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.session.read_holding_registers(address, count) => Some(r),
        }
    }

    fn read_succeeded(&mut self) {
        self.consecutive_link_errors = 0;
        self.reconnect_delay = self.config.backoff.first();
    }

    /// Count the fault against the link and hand it to the fault sink.
    /// `Some` when the cycle must end: cancelled, or too many link errors.
    async fn report(
        &mut self,
        source_tag: String,
        channel_index: Option<usize>,
        cause: FaultCause,
        cancel: &CancellationToken,
    ) -> Option<PollerState> {
        if cause.is_link_failure() {
            self.consecutive_link_errors += 1;
        } else {
            self.consecutive_link_errors = 0;
        }

        let fault = ReadFault {
            device: self.descriptor.name().to_string(),
            source_tag,
            channel_index,
            error: cause,
            consecutive_link_errors: self.consecutive_link_errors,
            timestamp: chrono::Utc::now(),
        };
        if !deliver(&self.faults, fault, cancel).await {
            return Some(PollerState::Closed);
        }

        if self.consecutive_link_errors >= self.config.link_error_threshold {
            error!(
                "{}: link errors({}), reconnecting",
                self.descriptor.name(),
                self.consecutive_link_errors
            );
            return Some(PollerState::Error);
        }
        None
    }

    async fn wait_interval(&mut self, cancel: &CancellationToken) -> PollerState {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => PollerState::Closed,
            _ = sleep(self.config.poll_interval) => PollerState::Polling,
        }
    }

    /// Drop the broken link and back off before reconnecting
    async fn recover(&mut self, cancel: &CancellationToken) -> PollerState {
        self.session.close().await;
        self.consecutive_link_errors = 0;

        let delay = self.reconnect_delay;
        self.reconnect_delay = self.config.backoff.next(delay);
        info!(
            "{}: reconnecting in {}ms",
            self.descriptor.name(),
            delay.as_millis()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => PollerState::Closed,
            _ = sleep(delay) => PollerState::Connecting,
        }
    }
}

/// Push a record to a sink; `false` when cancelled while the sink was full.
/// A dropped receiver only loses the record.
async fn deliver<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        r = tx.send(item) => {
            if r.is_err() {
                debug!("Sink closed, record dropped");
            }
            true
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(5000),
        };
        let mut delay = policy.first();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(delay.as_millis());
            delay = policy.next(delay);
        }
        assert_eq!(seen, vec![1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn test_backoff_never_zero() {
        let policy = BackoffPolicy {
            initial: Duration::ZERO,
            max: Duration::from_millis(10),
        };
        assert!(policy.first() > Duration::ZERO);
        assert!(policy.next(Duration::ZERO) > Duration::ZERO);
    }

    #[test]
    fn test_default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.link_error_threshold, 3);
        assert_eq!(config.backoff.max, Duration::from_secs(30));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PollerState::Connecting.to_string(), "connecting");
        assert_eq!(PollerState::Closed.to_string(), "closed");
    }
}
