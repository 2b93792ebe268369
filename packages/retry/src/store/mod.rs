mod traits;

pub mod memory;

pub use memory::InMemoryFailureStore;
pub use traits::FailureRecordStore;
