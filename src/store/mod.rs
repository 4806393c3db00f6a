//! Task storage — the `TaskStore` seam and its in-memory implementation.

pub mod memory;
pub mod traits;

pub use memory::InMemoryTaskStore;
pub use traits::TaskStore;
