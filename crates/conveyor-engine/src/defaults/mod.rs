//! Default component implementations for tests and lightweight embedding.

mod in_memory_store;

pub use in_memory_store::InMemoryStore;
