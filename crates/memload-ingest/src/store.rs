//! Key-value store clients
//!
//! Sinks write through the [`KvStore`] trait. The production client,
//! [`MemcacheStore`], wraps an `async-memcached` connection that is opened
//! lazily and reopened after any failed write.

use async_memcached::{AsciiProtocol, Client};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Longest key memcached accepts
pub const MAX_KEY_LEN: usize = 250;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("write to {addr} failed: {reason}")]
    Write { addr: String, reason: String },

    #[error("{op} to {addr} timed out after {after:?}")]
    Timeout {
        addr: String,
        op: &'static str,
        after: Duration,
    },

    #[error("invalid key '{0}'")]
    InvalidKey(String),
}

impl StoreError {
    /// Whether another attempt with the same key and value can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::InvalidKey(_))
    }
}

/// Minimal write interface of a key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key` with an expiry in seconds and opaque client flags
    async fn put(&self, key: &str, value: &[u8], ttl_secs: u32, flags: u32) -> Result<(), StoreError>;

    /// Address used in log lines
    fn address(&self) -> &str;
}

/// Check a key against the memcached text protocol rules
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// memcached client bound to one server
pub struct MemcacheStore {
    addr: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl MemcacheStore {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            io_timeout,
            client: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Client, StoreError> {
        let dsn = format!("tcp://{}", self.addr);
        let client = timeout(self.connect_timeout, Client::new(dsn))
            .await
            .map_err(|_| StoreError::Timeout {
                addr: self.addr.clone(),
                op: "connect",
                after: self.connect_timeout,
            })?
            .map_err(|e| StoreError::Connect {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;
        debug!(addr = %self.addr, "Connected to memcached");
        Ok(client)
    }
}

#[async_trait]
impl KvStore for MemcacheStore {
    async fn put(&self, key: &str, value: &[u8], ttl_secs: u32, flags: u32) -> Result<(), StoreError> {
        validate_key(key)?;

        let mut guard = self.client.lock().await;
        let mut client = match guard.take() {
            Some(client) => client,
            None => self.connect().await?,
        };

        let result = match timeout(
            self.io_timeout,
            client.set(key, value, Some(i64::from(ttl_secs)), Some(flags)),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StoreError::Write {
                addr: self.addr.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(StoreError::Timeout {
                addr: self.addr.clone(),
                op: "set",
                after: self.io_timeout,
            }),
        };

        // A failed exchange may leave unread bytes on the stream.
        match result {
            Ok(()) => *guard = Some(client),
            Err(_) => debug!(addr = %self.addr, "Dropping memcached connection"),
        }

        result
    }

    fn address(&self) -> &str {
        &self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("idfa:1rfw452y52g2gq4g").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("idfa:has space").is_err());
        assert!(validate_key("gaid:new\nline").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_invalid_key_is_not_retryable() {
        assert!(!StoreError::InvalidKey("x y".into()).is_retryable());
        assert!(StoreError::Write {
            addr: "127.0.0.1:11211".into(),
            reason: "SERVER_ERROR out of memory".into(),
        }
        .is_retryable());
    }
}
