use anyhow::{bail, Result};
use telemetry_client::db;
use telemetry_pipeline::{bootstrap, config::AppConfig, observability};

/// Print what the worker has stored for one device.
#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    let mut logging = cfg.logging.clone();
    logging.file_enabled = false;
    let _log_guard = observability::init_tracing(&logging, "device-readings")?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        bail!("usage: device-readings <device_id>");
    }
    let device_id = &args[1];

    let pool = bootstrap::connect(cfg.storage_uri()?, 1).await?;
    db::ensure_water_data_table(&pool).await?;

    let total = db::count_readings(&pool).await?;
    let rows = db::readings_for_device(&pool, device_id).await?;

    for row in &rows {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            row.id,
            row.timestamp,
            row.level,
            row.flow.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            row.energy.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
        );
    }

    tracing::info!(
        device_id = %device_id,
        device_rows = rows.len(),
        total_rows = total,
        table = db::WATER_DATA_TABLE,
        "readings listed"
    );

    Ok(())
}
