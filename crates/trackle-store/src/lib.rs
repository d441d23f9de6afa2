pub mod database;
pub mod error;
pub mod events;
pub mod packages;
pub mod payloads;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
