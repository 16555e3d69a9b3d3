use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

use crate::common::{DeviceKind, DeviceRecord, Point2D, SimResult, SimulationError};
use crate::domains::DeviceStore;

const SELECT_COLUMNS: &str = "mac_address, name, type, cluster_name, randomizer, \
     position_x, position_y, target_x, target_y, created_at, updated_at";

/// One row per device in a local SQLite database, keyed by MAC address.
pub struct SqliteDeviceStore {
    pool: SqlitePool,
}

impl SqliteDeviceStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SimulationError::Persistence(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!(path = %path.display(), "Connected to device database");
        Ok(store)
    }

    async fn initialize_schema(&self) -> SimResult<()> {
        let schema = r#"
            CREATE TABLE IF NOT EXISTS devices (
                mac_address TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                cluster_name TEXT,
                randomizer REAL NOT NULL,
                position_x REAL NOT NULL,
                position_y REAL NOT NULL,
                target_x REAL,
                target_y REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#;
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> SimResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SimulationError::Persistence(format!("Invalid timestamp {}: {}", value, e)))
}

fn row_to_record(row: &SqliteRow) -> SimResult<DeviceRecord> {
    let kind: String = row.try_get("type")?;
    let target_x: Option<f64> = row.try_get("target_x")?;
    let target_y: Option<f64> = row.try_get("target_y")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(DeviceRecord {
        name: row.try_get("name")?,
        kind: kind.parse()?,
        mac_address: row.try_get("mac_address")?,
        position: Point2D::new(row.try_get("position_x")?, row.try_get("position_y")?),
        target_point: target_x.zip(target_y).map(|(x, y)| Point2D::new(x, y)),
        randomizer: row.try_get("randomizer")?,
        cluster_name: row.try_get("cluster_name")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl DeviceStore for SqliteDeviceStore {
    async fn load_devices(&self, kind: DeviceKind, limit: usize) -> SimResult<Vec<DeviceRecord>> {
        let query = format!(
            "SELECT {} FROM devices WHERE type = ? ORDER BY name LIMIT ?",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(kind.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let records = rows.iter().map(row_to_record).collect::<SimResult<Vec<_>>>()?;
        if !records.is_empty() {
            info!(count = records.len(), %kind, "Loaded devices from database");
        }
        Ok(records)
    }

    async fn save_devices(&self, records: &[DeviceRecord]) -> SimResult<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT OR REPLACE INTO devices \
                 (mac_address, name, type, cluster_name, randomizer, position_x, position_y, \
                  target_x, target_y, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.mac_address.as_str())
            .bind(record.name.as_str())
            .bind(record.kind.as_str())
            .bind(record.cluster_name.as_deref())
            .bind(record.randomizer)
            .bind(record.position.x)
            .bind(record.position.y)
            .bind(record.target_point.map(|t| t.x))
            .bind(record.target_point.map(|t| t.y))
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = records.len(), "Saved devices to database");
        Ok(())
    }

    async fn clear(&self) -> SimResult<()> {
        sqlx::query("DELETE FROM devices").execute(&self.pool).await?;
        Ok(())
    }
}
