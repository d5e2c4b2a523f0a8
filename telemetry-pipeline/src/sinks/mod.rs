pub mod postgres;

pub use postgres::PgReadingStore;
