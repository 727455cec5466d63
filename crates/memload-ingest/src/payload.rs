//! Store payload encoding
//!
//! Records are stored as a `UserApps` protobuf message:
//!
//! ```text
//! message UserApps {
//!     repeated uint32 apps = 1 [packed=true];
//!     optional double lat = 2;
//!     optional double lon = 3;
//! }
//! ```

use prost::Message;
use thiserror::Error;

use crate::record::DeviceRecord;

#[derive(Clone, PartialEq, prost::Message)]
pub struct UserApps {
    #[prost(uint32, repeated, packed = "true", tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

impl From<&DeviceRecord> for UserApps {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            apps: record.apps.iter().copied().collect(),
            lat: Some(record.lat),
            lon: Some(record.lon),
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to encode payload for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: prost::EncodeError,
    },
}

/// Serialize a record into its store value
pub fn encode(record: &DeviceRecord) -> Result<Vec<u8>, PayloadError> {
    let message = UserApps::from(record);
    let mut buf = Vec::with_capacity(message.encoded_len());
    message.encode(&mut buf).map_err(|source| PayloadError::Encode {
        key: record.key(),
        source,
    })?;
    Ok(buf)
}
