//! Test helpers for memload integration tests
//!
//! - In-memory [`KvStore`] fakes that record or fail writes
//! - Gzip batch fixtures written to a temporary directory

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use memload_ingest::pipeline::StoreSet;
use memload_ingest::record::DeviceType;
use memload_ingest::store::{KvStore, StoreError};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One recorded `put` call
#[derive(Debug, Clone)]
pub struct StoredWrite {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl_secs: u32,
    pub flags: u32,
}

/// Store that keeps every write and optionally fails all of them
#[derive(Clone)]
pub struct RecordingStore {
    addr: String,
    always_fail: bool,
    calls: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<StoredWrite>>>,
}

impl RecordingStore {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            always_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(addr: &str) -> Self {
        Self {
            always_fail: true,
            ..Self::new(addr)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<StoredWrite> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl KvStore for RecordingStore {
    async fn put(&self, key: &str, value: &[u8], ttl_secs: u32, flags: u32) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(StoreError::Write {
                addr: self.addr.clone(),
                reason: "SERVER_ERROR out of memory".to_string(),
            });
        }
        self.writes.lock().unwrap().push(StoredWrite {
            key: key.to_string(),
            value: value.to_vec(),
            ttl_secs,
            flags,
        });
        Ok(())
    }

    fn address(&self) -> &str {
        &self.addr
    }
}

/// One recording store per device type, plus handles to inspect them
pub fn recording_stores() -> (StoreSet, BTreeMap<DeviceType, RecordingStore>) {
    let handles: BTreeMap<DeviceType, RecordingStore> = DeviceType::ALL
        .into_iter()
        .map(|t| (t, RecordingStore::new(&format!("fake-{t}"))))
        .collect();
    (store_set(&handles), handles)
}

/// Box clones of `handles` into a store set for the pipeline
pub fn store_set(handles: &BTreeMap<DeviceType, RecordingStore>) -> StoreSet {
    handles
        .iter()
        .map(|(t, store)| {
            let boxed: Box<dyn KvStore> = Box::new(store.clone());
            (*t, boxed)
        })
        .collect()
}

/// Write `lines` as a gzip batch named `name` under `dir`
pub fn write_batch(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap();
    path
}

/// `count` valid lines cycling through the device types
pub fn valid_lines(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let device_type = DeviceType::ALL[i % DeviceType::ALL.len()];
            format!("{device_type}\t{prefix}{i}\t55.55\t42.42\t{},{}", i + 1, i + 2)
        })
        .collect()
}

/// Path of the dot-prefixed sibling a finished batch is renamed to
pub fn done_sibling(path: &Path) -> PathBuf {
    let name = path.file_name().unwrap().to_string_lossy();
    path.with_file_name(format!(".{name}"))
}
