use axum::extract::State;
use axum::{Extension, Json};
use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, Utc};
use greenhouse_common::{ControlMode, NewReading, Reading, SensorControl, SensorType};
use greenhouse_config::ThresholdConfig;
use greenhouse_db::ControlUpdate;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::state::SharedState;

pub async fn health() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One batch of measurements from a greenhouse controller. Zero means
/// "not measured" and produces no reading.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateReadingsRequest {
    pub temperature: f64,
    pub humidity: f64,
    pub light_level: f64,
    pub water_level: f64,
    pub soil_moisture: f64,
}

impl CreateReadingsRequest {
    fn into_new_readings(self) -> Vec<NewReading> {
        [
            (SensorType::Temperature, self.temperature),
            (SensorType::Humidity, self.humidity),
            (SensorType::Light, self.light_level),
            (SensorType::Water, self.water_level),
            (SensorType::Soil, self.soil_moisture),
        ]
        .into_iter()
        .filter(|(_, value)| *value != 0.0)
        .map(|(sensor_type, value)| NewReading { sensor_type, value })
        .collect()
    }
}

fn reading_resource(reading: &Reading) -> Value {
    json!({
        "id": reading.id,
        "type": "sensor-reading",
        "attributes": {
            "type": reading.sensor_type,
            "value": reading.value,
            "timestamp": reading.timestamp,
        },
        "relationships": {},
        "includes": {},
        "links": {},
    })
}

fn reading_collection(readings: &[Reading]) -> Json<Value> {
    Json(json!({
        "data": readings.iter().map(reading_resource).collect::<Vec<_>>(),
    }))
}

pub async fn list_readings(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let readings = state.readings.fetch_readings().await?;
    info!(count = readings.len(), "listed sensor readings");
    Ok(reading_collection(&readings))
}

pub async fn create_readings(
    State(state): State<SharedState>,
    body: Result<Json<CreateReadingsRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body.map_err(|e| {
        warn!(error = %e, "rejected readings body");
        ApiError::bad_request("invalid request")
    })?;

    let mut created = Vec::new();
    for new_reading in request.into_new_readings() {
        created.push(state.readings.create_reading(new_reading).await?);
    }

    let types: Vec<&str> = created.iter().map(|r| r.sensor_type.as_str()).collect();
    info!(?types, count = created.len(), "created sensor readings");
    Ok(reading_collection(&created))
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SetControlRequest {
    #[serde(default)]
    pub sensor_type: String,
    #[serde(default)]
    pub mode: String,
    pub manual_until: Option<DateTime<Utc>>,
    pub manual_int_value: Option<i64>,
    pub manual_bool_value: Option<bool>,
}

impl SetControlRequest {
    fn into_update(self) -> Option<ControlUpdate> {
        let sensor_type = self.sensor_type.trim().to_string();
        if sensor_type.is_empty() {
            return None;
        }
        let mode: ControlMode = self.mode.parse().ok()?;
        Some(ControlUpdate {
            sensor_type,
            mode,
            manual_until: self.manual_until,
            manual_int_value: self.manual_int_value,
            manual_bool_value: self.manual_bool_value,
        })
    }
}

/// Flatten controls into `{"fan_mode": "manual", "fan": 255, ...}`.
pub fn control_map(controls: &[SensorControl]) -> Map<String, Value> {
    let mut map = Map::new();
    for control in controls {
        map.insert(
            format!("{}_mode", control.sensor_type),
            Value::from(control.mode.as_str()),
        );
        map.insert(control.sensor_type.clone(), control.reported_value());
    }
    map
}

pub async fn list_controls(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let controls = state.controls.all_controls().await?;
    Ok(Json(Value::Object(control_map(&controls))))
}

pub async fn set_control(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    body: Result<Json<SetControlRequest>, JsonRejection>,
) -> Result<Json<SensorControl>, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::bad_request("invalid request"))?;
    let update = request
        .into_update()
        .ok_or_else(|| ApiError::bad_request("sensor_type and valid mode required"))?;

    let control = state.controls.upsert_control(update).await?;
    info!(
        sensor_type = %control.sensor_type,
        mode = %control.mode,
        user = %claims.username,
        "set sensor control mode"
    );
    Ok(Json(control))
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

pub async fn thresholds(State(state): State<SharedState>) -> Json<ThresholdConfig> {
    Json(state.config.thresholds.clone())
}
