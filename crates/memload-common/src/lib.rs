//! memload common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the memload workspace.
//!
//! - **Error Handling**: [`MemloadError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber configuration, see [`logging`]
//!
//! # Example
//!
//! ```no_run
//! use memload_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::builder().level(LogLevel::Debug).build();
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{MemloadError, Result};
