mod reading;
mod stored_row;

pub use reading::{NewRow, Reading};
pub use stored_row::StoredRow;
