pub mod database;
pub mod entity;
pub mod failure_store;

pub use database::{connect, init_db};
pub use failure_store::SeaOrmFailureStore;
