use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Automatic,
    Manual,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMode::Automatic => "automatic",
            ControlMode::Manual => "manual",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(ControlMode::Automatic),
            "manual" => Ok(ControlMode::Manual),
            other => Err(Error::Validation(format!("unknown control mode: {other}"))),
        }
    }
}

/// Per-actuator control state (fan, heat, light, door, pump, ...).
///
/// Each actuator carries its own mode; there is no greenhouse-wide switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorControl {
    pub sensor_type: String,
    pub mode: ControlMode,
    pub manual_until: Option<DateTime<Utc>>,
    pub manual_int_value: Option<i64>,
    pub manual_bool_value: Option<bool>,
}

impl SensorControl {
    /// The value to report for this actuator: fan/heat/light are dimmable,
    /// door/pump are switches, anything else has no reportable value.
    pub fn reported_value(&self) -> serde_json::Value {
        match self.sensor_type.as_str() {
            "fan" | "heat" | "light" => self
                .manual_int_value
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            "door" | "pump" => self
                .manual_bool_value
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        }
    }
}
