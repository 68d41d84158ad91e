use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool};
use serde_json::Value;
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::Row;

use super::{Collection, SensorStore};
use crate::connections::db_postgres;
use crate::error::StoreError;
use crate::models::{AlertRow, PersonalityRow, ReadingRow, SettingRow};

const ORDERING: &str = "COALESCE(created_at, timestamp)";

/// # PostgreSQL Store
///
/// `SensorStore` over the tables described in `sql/schema.sql`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn client(&self) -> Result<Object, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, StoreError> {
        let client = self.client().await?;
        client
            .query(sql, params)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row, StoreError> {
        let client = self.client().await?;
        client
            .query_one(sql, params)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn recent(&self, collection: Collection, columns: &str, limit: usize) -> Result<Vec<Row>, StoreError> {
        let sql = format!(
            "SELECT {columns} FROM {} ORDER BY {ORDERING} DESC NULLS LAST LIMIT $1",
            collection.table()
        );
        self.query(&sql, &[&(limit as i64)]).await
    }
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, collection: &'static str, name: &str) -> Result<T, StoreError> {
    row.try_get(name).map_err(|e| StoreError::Decode {
        collection,
        reason: format!("{name}: {e}"),
    })
}

fn count(row: &Row, collection: &'static str) -> Result<u64, StoreError> {
    let n: i64 = col(row, collection, "n")?;
    Ok(n.max(0) as u64)
}

fn reading(row: &Row) -> Result<ReadingRow, StoreError> {
    const TABLE: &str = "temperature_readings";
    Ok(ReadingRow {
        sensor_id: col(row, TABLE, "sensor_id")?,
        timestamp: col(row, TABLE, "timestamp")?,
        created_at: col(row, TABLE, "created_at")?,
        temperatures: col::<Option<Vec<Option<f64>>>>(row, TABLE, "temperatures")?.unwrap_or_default(),
        temperature_ave: col(row, TABLE, "temperature_ave")?,
    })
}

fn alert(row: &Row) -> Result<AlertRow, StoreError> {
    const TABLE: &str = "alerts_log";
    Ok(AlertRow {
        sensor_id: col(row, TABLE, "sensor_id")?,
        timestamp: col(row, TABLE, "timestamp")?,
        created_at: col(row, TABLE, "created_at")?,
        alert_reason: col(row, TABLE, "alert_reason")?,
        message: col(row, TABLE, "message")?,
        status: col(row, TABLE, "status")?,
        event_type: col(row, TABLE, "event_type")?,
        value: col::<Option<Value>>(row, TABLE, "value")?,
    })
}

fn setting(row: &Row) -> Result<SettingRow, StoreError> {
    const TABLE: &str = "settings_history";
    Ok(SettingRow {
        sensor_id: col(row, TABLE, "sensor_id")?,
        timestamp: col(row, TABLE, "timestamp")?,
        created_at: col(row, TABLE, "created_at")?,
        content: col(row, TABLE, "content")?,
        change_type: col(row, TABLE, "change_type")?,
        value: col::<Option<Value>>(row, TABLE, "value")?,
    })
}

fn personality(row: &Row) -> Result<PersonalityRow, StoreError> {
    const TABLE: &str = "personality_history";
    Ok(PersonalityRow {
        sensor_id: col(row, TABLE, "sensor_id")?,
        timestamp: col(row, TABLE, "timestamp")?,
        created_at: col(row, TABLE, "created_at")?,
        content: col(row, TABLE, "content")?,
        bias_type: col(row, TABLE, "bias_type")?,
        bias_value: col::<Option<Value>>(row, TABLE, "bias_value")?,
    })
}

#[async_trait]
impl SensorStore for PostgresStore {
    async fn list_sensor_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = self
            .query(
                "SELECT DISTINCT sensor_id FROM temperature_readings \
                 WHERE sensor_id IS NOT NULL ORDER BY sensor_id",
                &[],
            )
            .await?;
        rows.iter()
            .map(|r| col(r, "temperature_readings", "sensor_id"))
            .collect()
    }

    async fn latest_readings(&self, sensor_id: &str, limit: usize) -> Result<Vec<ReadingRow>, StoreError> {
        let sql = format!(
            "SELECT sensor_id, timestamp, created_at, temperatures, temperature_ave \
             FROM temperature_readings WHERE sensor_id = $1 \
             ORDER BY {ORDERING} DESC NULLS LAST LIMIT $2"
        );
        let rows = self.query(&sql, &[&sensor_id, &(limit as i64)]).await?;
        rows.iter().map(reading).collect()
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRow>, StoreError> {
        let rows = self
            .recent(
                Collection::Alerts,
                "sensor_id, timestamp, created_at, alert_reason, message, status, event_type, value",
                limit,
            )
            .await?;
        rows.iter().map(alert).collect()
    }

    async fn recent_setting_changes(&self, limit: usize) -> Result<Vec<SettingRow>, StoreError> {
        let rows = self
            .recent(
                Collection::SettingChanges,
                "sensor_id, timestamp, created_at, content, change_type, value",
                limit,
            )
            .await?;
        rows.iter().map(setting).collect()
    }

    async fn recent_personality_changes(&self, limit: usize) -> Result<Vec<PersonalityRow>, StoreError> {
        let rows = self
            .recent(
                Collection::PersonalityChanges,
                "sensor_id, timestamp, created_at, content, bias_type, bias_value",
                limit,
            )
            .await?;
        rows.iter().map(personality).collect()
    }

    async fn count_all(&self, collection: Collection) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", collection.table());
        let row = self.query_one(&sql, &[]).await?;
        count(&row, collection.table())
    }

    async fn count_since(&self, collection: Collection, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {ORDERING} >= $1",
            collection.table()
        );
        let row = self.query_one(&sql, &[&since]).await?;
        count(&row, collection.table())
    }

    async fn count_active_sensors(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(DISTINCT sensor_id) AS n FROM temperature_readings WHERE {ORDERING} >= $1"
        );
        let row = self.query_one(&sql, &[&since]).await?;
        count(&row, "temperature_readings")
    }

    async fn last_update(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let sql = format!("SELECT MAX({ORDERING}) AS last FROM temperature_readings");
        let row = self.query_one(&sql, &[]).await?;
        col(&row, "temperature_readings", "last")
    }

    async fn ping(&self) -> Result<(), StoreError> {
        db_postgres::ping(&self.pool).await
    }

    async fn size_estimate(&self) -> Result<u64, StoreError> {
        let row = self
            .query_one("SELECT pg_database_size(current_database()) AS n", &[])
            .await?;
        count(&row, "pg_database")
    }
}
