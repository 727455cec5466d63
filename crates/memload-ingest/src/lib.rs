//! memload ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads gzip compressed, tab separated installed-apps batches into per device
//! type memcached stores.
//!
//! # Pipeline
//!
//! - **Record parsing** ([`record`]): one line into a [`record::DeviceRecord`]
//! - **Routing** ([`routing`]): bounded queue per device type
//! - **Sinks** ([`sink`]): write with retries, acknowledge every record
//! - **Batches** ([`batch`]): read, route, await acks, judge the error rate
//! - **Completion** ([`completion`]): rename consumed batches out of the way
//!
//! # Example
//!
//! ```no_run
//! use memload_ingest::{config::IngestConfig, discovery, pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::default();
//!     let batches = discovery::discover(&config.pattern)?;
//!     let stores = pipeline::memcache_stores(&config);
//!     let summary = pipeline::run(&config, stores, batches).await?;
//!     println!("{} batches accepted", summary.accepted());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod completion;
pub mod config;
pub mod discovery;
pub mod payload;
pub mod pipeline;
pub mod record;
pub mod routing;
pub mod sink;
pub mod store;
