//! Installed-apps record parsing
//!
//! One input line has the form
//! `device_type \t device_id \t lat \t lon \t app1,app2,...`.
//! A line is rejected only when it lacks fields or identity; bad coordinates
//! and bad app ids degrade the record instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Minimum number of tab separated fields in a record line
pub const MIN_FIELDS: usize = 5;

/// Device category. Selects the target store and sink queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// iOS advertising identifier
    Idfa,
    /// Google advertising identifier
    Gaid,
    /// Android id
    Adid,
    /// Device id
    Dvid,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Idfa,
        DeviceType::Gaid,
        DeviceType::Adid,
        DeviceType::Dvid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Idfa => "idfa",
            DeviceType::Gaid => "gaid",
            DeviceType::Adid => "adid",
            DeviceType::Dvid => "dvid",
        }
    }

    /// Position in [`DeviceType::ALL`]
    pub fn index(self) -> usize {
        match self {
            DeviceType::Idfa => 0,
            DeviceType::Gaid => 1,
            DeviceType::Adid => 2,
            DeviceType::Dvid => 3,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idfa" => Ok(DeviceType::Idfa),
            "gaid" => Ok(DeviceType::Gaid),
            "adid" => Ok(DeviceType::Adid),
            "dvid" => Ok(DeviceType::Dvid),
            other => Err(ParseError::UnknownDeviceType(other.to_string())),
        }
    }
}

/// A validated installed-apps record
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub device_type: DeviceType,
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    pub apps: BTreeSet<u32>,
}

impl DeviceRecord {
    /// Store key, `"<device_type>:<device_id>"`
    pub fn key(&self) -> String {
        format!("{}:{}", self.device_type, self.device_id)
    }
}

/// Line-level parse failure. The line is counted as a batch error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed line: expected at least {MIN_FIELDS} tab separated fields, got {0}")]
    MalformedLine(usize),

    #[error("line has an empty device type or device id")]
    MissingIdentity,

    #[error("unknown device type '{0}'")]
    UnknownDeviceType(String),
}

/// A field that could not be parsed but did not reject the line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftDegradation {
    InvalidLatitude(String),
    InvalidLongitude(String),
    InvalidAppId(String),
}

impl fmt::Display for SoftDegradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftDegradation::InvalidLatitude(raw) => write!(f, "invalid latitude '{raw}'"),
            SoftDegradation::InvalidLongitude(raw) => write!(f, "invalid longitude '{raw}'"),
            SoftDegradation::InvalidAppId(raw) => write!(f, "invalid app id '{raw}'"),
        }
    }
}

/// Parse result with the degradations applied along the way
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub record: DeviceRecord,
    pub degradations: Vec<SoftDegradation>,
}

/// Parse one line into a record, logging any soft degradation.
pub fn parse(line: &str) -> Result<DeviceRecord, ParseError> {
    let parsed = parse_line(line)?;
    for degradation in &parsed.degradations {
        warn!(
            key = %parsed.record.key(),
            issue = %degradation,
            "Degraded record field"
        );
    }
    Ok(parsed.record)
}

/// Parse one line and return the degradations instead of logging them.
pub fn parse_line(line: &str) -> Result<ParsedLine, ParseError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() < MIN_FIELDS {
        return Err(ParseError::MalformedLine(fields.len()));
    }

    let (raw_type, device_id) = (fields[0].trim(), fields[1].trim());
    if raw_type.is_empty() || device_id.is_empty() {
        return Err(ParseError::MissingIdentity);
    }
    let device_type: DeviceType = raw_type.parse()?;

    let mut degradations = Vec::new();

    let lat = fields[2].parse::<f64>().unwrap_or_else(|_| {
        degradations.push(SoftDegradation::InvalidLatitude(fields[2].to_string()));
        0.0
    });
    let lon = fields[3].parse::<f64>().unwrap_or_else(|_| {
        degradations.push(SoftDegradation::InvalidLongitude(fields[3].to_string()));
        0.0
    });

    let mut apps = BTreeSet::new();
    // Empty tokens (empty field, trailing comma) carry no app id and are skipped.
    for token in fields[4].split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<u32>() {
            Ok(app) => {
                apps.insert(app);
            },
            Err(_) => degradations.push(SoftDegradation::InvalidAppId(token.to_string())),
        }
    }

    Ok(ParsedLine {
        record: DeviceRecord {
            device_type,
            device_id: device_id.to_string(),
            lat,
            lon,
            apps,
        },
        degradations,
    })
}
