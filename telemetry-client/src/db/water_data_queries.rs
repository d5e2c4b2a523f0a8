use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{NewRow, StoredRow};

pub const WATER_DATA_TABLE: &str = "water_data";

/// Create `water_data` with the current column set, or upgrade a table that
/// predates the `flow`/`energy` columns and still types `timestamp` as a
/// TIMESTAMP. Safe to run any number of times.
pub async fn ensure_water_data_table(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS water_data (
            id SERIAL PRIMARY KEY,
            device_id VARCHAR(255) NOT NULL,
            timestamp VARCHAR(64) NOT NULL,
            level DOUBLE PRECISION NOT NULL,
            flow DOUBLE PRECISION,
            energy DOUBLE PRECISION
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Tables created by the level-only worker lack these.
    sqlx::query("ALTER TABLE water_data ADD COLUMN IF NOT EXISTS flow DOUBLE PRECISION")
        .execute(pool)
        .await?;
    sqlx::query("ALTER TABLE water_data ADD COLUMN IF NOT EXISTS energy DOUBLE PRECISION")
        .execute(pool)
        .await?;

    // Tables from the level-only worker type `timestamp` as TIMESTAMP.
    sqlx::query(
        r#"
        DO $$
        BEGIN
            IF EXISTS (
                SELECT 1
                FROM information_schema.columns
                WHERE table_schema = current_schema()
                  AND table_name = 'water_data'
                  AND column_name = 'timestamp'
                  AND data_type <> 'character varying'
            ) THEN
                ALTER TABLE water_data
                    ALTER COLUMN timestamp TYPE VARCHAR(64) USING timestamp::text;
            END IF;
        END
        $$
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert one row and return its generated id.
pub async fn insert_reading(pool: &PgPool, row: &NewRow) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO water_data (device_id, timestamp, level, flow, energy)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(&row.device_id)
    .bind(&row.timestamp)
    .bind(row.level)
    .bind(row.flow)
    .bind(row.energy)
    .fetch_one(pool)
    .await
}

/// Fetch the stored readings of one device in insertion order.
pub async fn readings_for_device(pool: &PgPool, device_id: &str) -> Result<Vec<StoredRow>> {
    let rows = sqlx::query_as::<_, StoredRow>(
        r#"
        SELECT
            id,
            device_id,
            timestamp,
            level,
            flow,
            energy
        FROM water_data
        WHERE device_id = $1
        ORDER BY id
        "#,
    )
    .bind(device_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn count_readings(pool: &PgPool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM water_data")
        .fetch_one(pool)
        .await?;

    Ok(count)
}
