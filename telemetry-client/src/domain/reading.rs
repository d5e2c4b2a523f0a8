/// A fully populated field reading, as the current devices report it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_code: String,
    pub time: String,
    pub level: f64,
    pub flow: f64,
    pub energy: f64,
}

/// Column values for one `water_data` insert.
///
/// `flow` and `energy` are optional because rows decoded from the legacy
/// message shape only carry a level.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRow {
    pub device_id: String,
    pub timestamp: String,
    pub level: f64,
    pub flow: Option<f64>,
    pub energy: Option<f64>,
}

impl From<Reading> for NewRow {
    fn from(r: Reading) -> Self {
        NewRow {
            device_id: r.device_code,
            timestamp: r.time,
            level: r.level,
            flow: Some(r.flow),
            energy: Some(r.energy),
        }
    }
}
