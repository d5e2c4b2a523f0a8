pub mod memory;
pub mod postgres;

pub use memory::InMemoryQueue;
pub use postgres::PgQueue;
