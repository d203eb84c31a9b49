/// A versioned chunk of schema DDL, applied idempotently at open.
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

pub const READINGS_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS sensor_readings (
            id TEXT PRIMARY KEY,
            sensor_type TEXT NOT NULL CHECK (sensor_type <> ''),
            value REAL NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sensor_readings_timestamp
            ON sensor_readings(timestamp);",
};

pub const CONTROLS_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS sensor_controls (
            sensor_type TEXT PRIMARY KEY,
            mode TEXT NOT NULL CHECK (mode IN ('automatic', 'manual')),
            manual_until TEXT,
            manual_int_value INTEGER,
            manual_bool_value INTEGER,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
};

pub const USERS_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE CHECK (username <> ''),
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
};
