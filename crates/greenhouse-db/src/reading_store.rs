use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use greenhouse_common::{Error, NewReading, Reading, Result, SensorType};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::connection::SharedConnection;
use crate::migrations::READINGS_SCHEMA_V1;

/// Read/write access to persisted sensor readings.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// All readings taken at or after `since`, oldest first.
    async fn fetch_readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>>;

    /// Every stored reading, oldest first.
    async fn fetch_readings(&self) -> Result<Vec<Reading>>;

    async fn create_reading(&self, reading: NewReading) -> Result<Reading>;
}

/// SQLite-backed [`ReadingSource`].
pub struct ReadingStore {
    conn: SharedConnection,
}

impl ReadingStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::with_connection(SharedConnection::open(db_path, "reading store")?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(SharedConnection::in_memory("reading store")?)
    }

    fn with_connection(conn: SharedConnection) -> Result<Self> {
        conn.migrate(READINGS_SCHEMA_V1.sql)?;
        Ok(Self { conn })
    }

    /// Insert a reading with an explicit timestamp. Used for imports and tests.
    pub fn insert_reading(&self, reading: &Reading) -> Result<()> {
        self.conn.with(|conn| insert_row(conn, reading))
    }
}

fn insert_row(conn: &Connection, reading: &Reading) -> Result<()> {
    conn.execute(
        "INSERT INTO sensor_readings (id, sensor_type, value, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            reading.id,
            reading.sensor_type.as_str(),
            reading.value,
            encode_timestamp(&reading.timestamp),
        ],
    )
    .map_err(|e| Error::Database(format!("failed to insert reading: {e}")))?;
    Ok(())
}

fn query_readings(conn: &Connection, since: Option<DateTime<Utc>>) -> Result<Vec<Reading>> {
    let floor = since.map(|s| encode_timestamp(&s)).unwrap_or_default();
    let mut stmt = conn
        .prepare(
            "SELECT id, sensor_type, value, timestamp FROM sensor_readings
             WHERE timestamp >= ?1
             ORDER BY timestamp ASC, rowid ASC",
        )
        .map_err(|e| Error::Database(format!("failed to prepare reading query: {e}")))?;

    let rows = stmt
        .query_map(params![floor], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| Error::Database(format!("failed to query readings: {e}")))?;

    let mut readings = Vec::new();
    for row in rows {
        let (id, sensor_type, value, timestamp) =
            row.map_err(|e| Error::Database(format!("failed to read reading row: {e}")))?;
        readings.push(Reading {
            id,
            sensor_type: SensorType::from(sensor_type.as_str()),
            value,
            timestamp: decode_timestamp(&timestamp)?,
        });
    }
    debug!(count = readings.len(), "loaded readings");
    Ok(readings)
}

#[async_trait]
impl ReadingSource for ReadingStore {
    async fn fetch_readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>> {
        self.conn
            .run(move |conn| query_readings(conn, Some(since)))
            .await
    }

    async fn fetch_readings(&self) -> Result<Vec<Reading>> {
        self.conn.run(|conn| query_readings(conn, None)).await
    }

    async fn create_reading(&self, reading: NewReading) -> Result<Reading> {
        if reading.sensor_type.as_str().is_empty() {
            return Err(Error::Validation("sensor type must not be empty".into()));
        }
        let stored = Reading::new(reading.sensor_type, reading.value, Utc::now());
        self.conn
            .run(move |conn| {
                insert_row(conn, &stored)?;
                Ok(stored)
            })
            .await
    }
}

// Fixed-width UTC encoding so lexical order in SQLite equals time order.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("invalid timestamp {raw:?}: {e}")))
}
