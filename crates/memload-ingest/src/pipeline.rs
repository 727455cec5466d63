//! Run orchestration
//!
//! One run wires the whole pipeline:
//! 1. Build the route table, one bounded queue per device type
//! 2. Spawn one sink task per device type, each owning its store client
//! 3. Spawn one blocking ingest task per batch
//! 4. Wait for every batch, then let the sinks drain and stop

use futures::future::join_all;
use memload_common::{MemloadError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::batch::{BatchIngestWorker, BatchReport};
use crate::config::IngestConfig;
use crate::record::DeviceType;
use crate::routing::RouteTable;
use crate::sink::{SinkStats, SinkWorker};
use crate::store::{KvStore, MemcacheStore};

/// Store clients keyed by the device type they serve
pub type StoreSet = BTreeMap<DeviceType, Box<dyn KvStore>>;

/// One memcached client per configured address
pub fn memcache_stores(config: &IngestConfig) -> StoreSet {
    config
        .addresses
        .iter()
        .map(|(device_type, addr)| {
            let store: Box<dyn KvStore> = Box::new(MemcacheStore::new(
                addr.clone(),
                config.connect_timeout(),
                config.write_timeout(),
            ));
            (*device_type, store)
        })
        .collect()
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub batches: Vec<BatchReport>,
    pub sinks: BTreeMap<DeviceType, SinkStats>,
    /// Batches whose task panicked and produced no report
    pub lost_batches: Vec<PathBuf>,
}

impl RunSummary {
    pub fn accepted(&self) -> usize {
        self.batches.iter().filter(|b| b.verdict.is_accepted()).count()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Ingest `batches` into `stores` and wait for everything to finish.
///
/// Per-batch and per-record failures are absorbed into the summary; only a
/// missing store for some device type fails the run, before any work starts.
pub async fn run(config: &IngestConfig, mut stores: StoreSet, batches: Vec<PathBuf>) -> Result<RunSummary> {
    if let Some(missing) = DeviceType::ALL.into_iter().find(|t| !stores.contains_key(t)) {
        return Err(MemloadError::MissingStore(missing.to_string()));
    }

    let (routes, receivers) = RouteTable::build(config.queue_capacity);
    let settings = config.sink_settings();

    let mut sinks = Vec::with_capacity(receivers.len());
    for (device_type, queue) in receivers {
        let store = stores
            .remove(&device_type)
            .ok_or_else(|| MemloadError::MissingStore(device_type.to_string()))?;
        info!(device_type = %device_type, store = %store.address(), "Starting sink");
        sinks.push((device_type, SinkWorker::new(device_type, store, settings).spawn(queue)));
    }

    let worker = BatchIngestWorker::new(Arc::new(routes), config.normal_error_rate);
    let handles: Vec<_> = batches
        .into_iter()
        .map(|path| {
            let worker = worker.clone();
            let task_path = path.clone();
            (path, tokio::task::spawn_blocking(move || worker.process(&task_path)))
        })
        .collect();
    // Sinks stop once the last batch releases its handle on the route table.
    drop(worker);

    let mut summary = RunSummary::default();
    for (path, handle) in handles {
        match handle.await {
            Ok(report) => summary.batches.push(report),
            Err(e) => {
                error!(batch = %path.display(), error = %e, "Batch task failed");
                summary.lost_batches.push(path);
            },
        }
    }

    let drained = join_all(
        sinks
            .into_iter()
            .map(|(device_type, handle)| async move { (device_type, handle.await) }),
    )
    .await;
    for (device_type, result) in drained {
        match result {
            Ok(stats) => {
                summary.sinks.insert(device_type, stats);
            },
            Err(e) => error!(device_type = %device_type, error = %e, "Sink task failed"),
        }
    }

    info!(
        batches = summary.batches.len(),
        accepted = summary.accepted(),
        lost = summary.lost_batches.len(),
        "Run finished"
    );
    Ok(summary)
}
