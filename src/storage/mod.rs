//! Storage adapters implementing [`NewsStorage`](crate::NewsStorage).

mod memory;

pub use memory::MemoryStorage;
