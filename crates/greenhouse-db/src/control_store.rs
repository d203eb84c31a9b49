use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenhouse_common::{ControlMode, Error, Result, SensorControl};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::connection::SharedConnection;
use crate::migrations::CONTROLS_SCHEMA_V1;
use crate::reading_store::{decode_timestamp, encode_timestamp};

/// Requested change to one actuator's control state.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlUpdate {
    pub sensor_type: String,
    pub mode: ControlMode,
    pub manual_until: Option<DateTime<Utc>>,
    pub manual_int_value: Option<i64>,
    pub manual_bool_value: Option<bool>,
}

/// Owner of actuator control modes. Injected wherever a mode is read or set,
/// so no component keeps its own copy of the "automatic" flag.
#[async_trait]
pub trait ControlSource: Send + Sync {
    async fn all_controls(&self) -> Result<Vec<SensorControl>>;

    async fn control(&self, sensor_type: &str) -> Result<Option<SensorControl>>;

    /// Insert the row if missing, otherwise overwrite it.
    async fn upsert_control(&self, update: ControlUpdate) -> Result<SensorControl>;
}

/// SQLite-backed [`ControlSource`].
pub struct ControlStore {
    conn: SharedConnection,
}

type ControlRow = (String, String, Option<String>, Option<i64>, Option<bool>);

const SELECT_CONTROLS: &str =
    "SELECT sensor_type, mode, manual_until, manual_int_value, manual_bool_value
     FROM sensor_controls";

impl ControlStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::with_connection(SharedConnection::open(db_path, "control store")?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(SharedConnection::in_memory("control store")?)
    }

    fn with_connection(conn: SharedConnection) -> Result<Self> {
        conn.migrate(CONTROLS_SCHEMA_V1.sql)?;
        Ok(Self { conn })
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ControlRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn to_control(row: ControlRow) -> Result<SensorControl> {
    let (sensor_type, mode, manual_until, manual_int_value, manual_bool_value) = row;
    Ok(SensorControl {
        sensor_type,
        mode: mode.parse()?,
        manual_until: manual_until.as_deref().map(decode_timestamp).transpose()?,
        manual_int_value,
        manual_bool_value,
    })
}

fn load_control(conn: &Connection, sensor_type: &str) -> Result<Option<SensorControl>> {
    conn.query_row(
        &format!("{SELECT_CONTROLS} WHERE sensor_type = ?1"),
        params![sensor_type],
        read_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to query control: {e}")))?
    .map(to_control)
    .transpose()
}

#[async_trait]
impl ControlSource for ControlStore {
    async fn all_controls(&self) -> Result<Vec<SensorControl>> {
        self.conn
            .run(|conn| {
                let mut stmt = conn
                    .prepare(&format!("{SELECT_CONTROLS} ORDER BY sensor_type"))
                    .map_err(|e| Error::Database(format!("failed to prepare control query: {e}")))?;
                let rows = stmt
                    .query_map([], read_row)
                    .map_err(|e| Error::Database(format!("failed to query controls: {e}")))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::Database(format!("failed to read control row: {e}")))?;
                rows.into_iter().map(to_control).collect()
            })
            .await
    }

    async fn control(&self, sensor_type: &str) -> Result<Option<SensorControl>> {
        let sensor_type = sensor_type.to_string();
        self.conn
            .run(move |conn| load_control(conn, &sensor_type))
            .await
    }

    async fn upsert_control(&self, update: ControlUpdate) -> Result<SensorControl> {
        if update.sensor_type.is_empty() {
            return Err(Error::Validation("sensor_type must not be empty".into()));
        }
        let saved = self
            .conn
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO sensor_controls
                        (sensor_type, mode, manual_until, manual_int_value, manual_bool_value)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(sensor_type) DO UPDATE SET
                       mode = excluded.mode,
                       manual_until = excluded.manual_until,
                       manual_int_value = excluded.manual_int_value,
                       manual_bool_value = excluded.manual_bool_value,
                       updated_at = datetime('now')",
                    params![
                        update.sensor_type,
                        update.mode.as_str(),
                        update.manual_until.as_ref().map(encode_timestamp),
                        update.manual_int_value,
                        update.manual_bool_value,
                    ],
                )
                .map_err(|e| Error::Database(format!("failed to upsert control: {e}")))?;

                load_control(conn, &update.sensor_type)?
                    .ok_or_else(|| Error::Database("control row missing after upsert".into()))
            })
            .await?;

        info!(
            sensor_type = %saved.sensor_type,
            mode = %saved.mode,
            "control mode updated"
        );
        Ok(saved)
    }
}
