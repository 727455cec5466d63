//! Ingestion configuration

use memload_common::{MemloadError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::batch::DEFAULT_NORMAL_ERROR_RATE;
use crate::record::DeviceType;
use crate::routing::DEFAULT_QUEUE_CAPACITY;
use crate::sink::SinkSettings;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_PATTERN: &str = "/data/appsinstalled/*.tsv.gz";
pub const DEFAULT_RETRY_COUNT: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 3_000;

/// Default memcached address for a device type
pub fn default_address(device_type: DeviceType) -> &'static str {
    match device_type {
        DeviceType::Idfa => "127.0.0.1:33013",
        DeviceType::Gaid => "127.0.0.1:33014",
        DeviceType::Adid => "127.0.0.1:33015",
        DeviceType::Dvid => "127.0.0.1:33016",
    }
}

/// Everything one ingestion run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// memcached `host:port` per device type
    pub addresses: BTreeMap<DeviceType, String>,
    pub dry_run: bool,
    /// Extra attempts after a failed write
    pub retry_count: u32,
    /// Batch file pattern
    pub pattern: String,
    /// Capacity of each device type queue
    pub queue_capacity: usize,
    /// Error rate below which a batch counts as loaded
    pub normal_error_rate: f64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            addresses: DeviceType::ALL
                .into_iter()
                .map(|t| (t, default_address(t).to_string()))
                .collect(),
            dry_run: false,
            retry_count: DEFAULT_RETRY_COUNT,
            pattern: DEFAULT_PATTERN.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            normal_error_rate: DEFAULT_NORMAL_ERROR_RATE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        for device_type in DeviceType::ALL {
            match self.addresses.get(&device_type) {
                Some(addr) if !addr.trim().is_empty() => {},
                _ => {
                    return Err(MemloadError::config(format!(
                        "no store address for device type '{device_type}'"
                    )))
                },
            }
        }
        if self.queue_capacity == 0 {
            return Err(MemloadError::config("queue capacity must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.normal_error_rate) {
            return Err(MemloadError::config(format!(
                "normal error rate must be within [0, 1], got {}",
                self.normal_error_rate
            )));
        }
        if self.pattern.trim().is_empty() {
            return Err(MemloadError::config("batch pattern must not be empty"));
        }
        if self.connect_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(MemloadError::config("store timeouts must be greater than 0"));
        }
        Ok(())
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            dry_run: self.dry_run,
            retry_count: self.retry_count,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
