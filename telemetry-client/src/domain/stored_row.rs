#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredRow {
    pub id: i32,
    pub device_id: String,
    pub timestamp: String,
    pub level: f64,
    pub flow: Option<f64>,
    pub energy: Option<f64>,
}
