pub mod water_data_queries;

pub use water_data_queries::{
    count_readings, ensure_water_data_table, insert_reading, readings_for_device, WATER_DATA_TABLE,
};
