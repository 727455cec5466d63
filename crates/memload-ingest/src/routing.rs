//! Device-type routing
//!
//! The [`RouteTable`] holds one bounded queue per device type and is built once
//! before any worker starts. Batch workers share it read-only; each queue has a
//! single consumer, the sink worker for that device type. A full queue blocks
//! the submitting batch, which is the only backpressure in the pipeline.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::record::{DeviceRecord, DeviceType};

/// Default per-queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Acknowledgement channel of one batch: a single slot carrying one outcome per record
pub type AckSender = mpsc::Sender<bool>;
pub type AckReceiver = mpsc::Receiver<bool>;

/// Create the acknowledgement channel owned by one batch
pub fn ack_channel() -> (AckSender, AckReceiver) {
    mpsc::channel(1)
}

/// Obligation to report exactly one outcome for a routed record.
///
/// Dropping the token without calling [`AckToken::complete`] reports a failure,
/// so a lost write can never leave its batch waiting.
#[derive(Debug)]
pub struct AckToken {
    tx: Option<AckSender>,
}

impl AckToken {
    pub fn new(tx: AckSender) -> Self {
        Self { tx: Some(tx) }
    }

    /// Report the outcome. Returns false when the batch is no longer listening.
    pub async fn complete(mut self, ok: bool) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(ok).await.is_ok(),
            None => false,
        }
    }
}

impl Drop for AckToken {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The owning batch waits on an empty slot, so this cannot be full.
            if tx.try_send(false).is_err() {
                warn!("Dropped acknowledgement could not be delivered");
            }
        }
    }
}

/// A parsed record on its way to a sink
#[derive(Debug)]
pub struct RoutedWrite {
    pub record: DeviceRecord,
    pub payload: Vec<u8>,
    /// Batch the record came from, for log lines
    pub batch: Arc<str>,
    pub ack: AckToken,
}

impl RoutedWrite {
    pub fn key(&self) -> String {
        self.record.key()
    }
}

#[derive(Debug, Error)]
#[error("route for device type '{0}' is closed")]
pub struct RouteClosed(pub DeviceType);

/// Receiving ends of the route table, one per device type, handed to sinks
pub type RouteReceivers = Vec<(DeviceType, mpsc::Receiver<RoutedWrite>)>;

/// Fixed mapping from device type to its sink queue
#[derive(Debug)]
pub struct RouteTable {
    routes: [mpsc::Sender<RoutedWrite>; 4],
    capacity: usize,
}

impl RouteTable {
    /// Build the table and the matching receivers.
    ///
    /// `capacity` is clamped to at least one slot.
    pub fn build(capacity: usize) -> (Self, RouteReceivers) {
        let capacity = capacity.max(1);
        let mut receivers = Vec::with_capacity(DeviceType::ALL.len());
        let routes = DeviceType::ALL.map(|device_type| {
            let (tx, rx) = mpsc::channel(capacity);
            receivers.push((device_type, rx));
            tx
        });
        (Self { routes, capacity }, receivers)
    }

    pub fn route_for(&self, device_type: DeviceType) -> &mpsc::Sender<RoutedWrite> {
        &self.routes[device_type.index()]
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue from async code, waiting while the queue is full
    pub async fn submit(&self, write: RoutedWrite) -> Result<(), RouteClosed> {
        let device_type = write.record.device_type;
        self.route_for(device_type)
            .send(write)
            .await
            .map_err(|_| RouteClosed(device_type))
    }

    /// Enqueue from a blocking thread, parking it while the queue is full.
    ///
    /// Must not be called from an async context.
    pub fn submit_blocking(&self, write: RoutedWrite) -> Result<(), RouteClosed> {
        let device_type = write.record.device_type;
        self.route_for(device_type)
            .blocking_send(write)
            .map_err(|_| RouteClosed(device_type))
    }
}
