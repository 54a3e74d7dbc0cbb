pub mod entities;
pub mod enums;
pub mod memory_store;
pub mod models;
pub mod postgres_store;
pub mod store;
pub mod tasks;

pub use memory_store::MemoryStore;
pub use postgres_store::PgStore;
pub use store::{Store, StoreError};
