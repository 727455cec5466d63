//! Per-device-type store writers
//!
//! Each [`SinkWorker`] owns the store client for its device type and drains
//! that type's queue until every producer is gone. Every routed record gets
//! exactly one acknowledgement: `true` only after a successful write (or in
//! dry-run mode), `false` once the retry budget is spent.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::record::DeviceType;
use crate::routing::RoutedWrite;
use crate::store::KvStore;

/// Expiry of every stored record, in seconds
pub const RECORD_TTL_SECS: u32 = 60 * 60;

/// Client flags stored alongside every record
pub const RECORD_FLAGS: u32 = 9;

/// Write behavior shared by all sinks
#[derive(Debug, Clone, Copy)]
pub struct SinkSettings {
    /// Log keys instead of writing
    pub dry_run: bool,
    /// Extra attempts after the first failed write
    pub retry_count: u32,
}

/// Result of writing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub success: bool,
    /// Store calls made; zero in dry-run mode
    pub attempts: u32,
}

/// Counters reported when a sink shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub written: u64,
    pub failed: u64,
    pub attempts: u64,
    /// Acks the batch was no longer waiting for
    pub unacked: u64,
}

pub struct SinkWorker {
    device_type: DeviceType,
    store: Box<dyn KvStore>,
    settings: SinkSettings,
}

impl SinkWorker {
    pub fn new(device_type: DeviceType, store: Box<dyn KvStore>, settings: SinkSettings) -> Self {
        Self {
            device_type,
            store,
            settings,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Run the worker on the current runtime
    pub fn spawn(self, queue: mpsc::Receiver<RoutedWrite>) -> JoinHandle<SinkStats> {
        tokio::spawn(self.run(queue))
    }

    /// Drain `queue` until all senders are dropped
    pub async fn run(self, mut queue: mpsc::Receiver<RoutedWrite>) -> SinkStats {
        let mut stats = SinkStats::default();
        debug!(device_type = %self.device_type, store = %self.store.address(), "Sink started");

        while let Some(write) = queue.recv().await {
            let outcome = self.write(&write).await;
            stats.attempts += u64::from(outcome.attempts);
            if outcome.success {
                stats.written += 1;
            } else {
                stats.failed += 1;
            }

            let RoutedWrite { batch, ack, .. } = write;
            if !ack.complete(outcome.success).await {
                stats.unacked += 1;
                warn!(device_type = %self.device_type, batch = %batch, "Batch stopped listening for acks");
            }
        }

        info!(
            device_type = %self.device_type,
            written = stats.written,
            failed = stats.failed,
            attempts = stats.attempts,
            "Sink drained"
        );
        stats
    }

    /// Write one record, retrying failed attempts up to the configured budget
    pub async fn write(&self, write: &RoutedWrite) -> WriteOutcome {
        let key = write.key();

        if self.settings.dry_run {
            info!(store = %self.store.address(), key = %key, "Dry run, skipping write");
            return WriteOutcome {
                success: true,
                attempts: 0,
            };
        }

        let max_attempts = self.settings.retry_count.saturating_add(1);
        let mut attempts = 0;
        while attempts < max_attempts {
            attempts += 1;
            match self
                .store
                .put(&key, &write.payload, RECORD_TTL_SECS, RECORD_FLAGS)
                .await
            {
                Ok(()) => {
                    return WriteOutcome {
                        success: true,
                        attempts,
                    }
                },
                Err(e) if e.is_retryable() => {
                    warn!(
                        store = %self.store.address(),
                        key = %key,
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "Store write failed"
                    );
                },
                Err(e) => {
                    error!(store = %self.store.address(), key = %key, error = %e, "Store write not retryable");
                    return WriteOutcome {
                        success: false,
                        attempts,
                    };
                },
            }
        }

        error!(
            store = %self.store.address(),
            key = %key,
            batch = %write.batch,
            attempts,
            "Giving up on record"
        );
        WriteOutcome {
            success: false,
            attempts,
        }
    }
}
