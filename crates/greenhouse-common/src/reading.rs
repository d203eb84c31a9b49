use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of sensor a reading came from.
///
/// The set is open: devices may report types the backend has never seen, and
/// those are carried through verbatim as [`SensorType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorType {
    Temperature,
    Humidity,
    Light,
    Water,
    Soil,
    Other(String),
}

impl SensorType {
    pub fn as_str(&self) -> &str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Light => "light",
            SensorType::Water => "water",
            SensorType::Soil => "soil",
            SensorType::Other(name) => name,
        }
    }
}

impl From<&str> for SensorType {
    fn from(value: &str) -> Self {
        match value {
            "temperature" => SensorType::Temperature,
            "humidity" => SensorType::Humidity,
            "light" => SensorType::Light,
            "water" => SensorType::Water,
            "soil" => SensorType::Soil,
            other => SensorType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SensorType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SensorType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(serde::de::Error::custom("sensor type must not be empty"));
        }
        Ok(SensorType::from(raw.as_str()))
    }
}

/// A single persisted sensor measurement. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: String,
    pub sensor_type: SensorType,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(sensor_type: impl Into<SensorType>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sensor_type: sensor_type.into(),
            value,
            timestamp,
        }
    }
}

/// Insert shape for a reading before the store assigns ID and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    pub sensor_type: SensorType,
    pub value: f64,
}
