//! Persistence seams for keys, usage logs, and pseudonymization mappings
//!
//! The traits themselves are defined at the crate root; this module holds
//! the bundled implementations.

pub mod memory;

pub use memory::{InMemoryKeyStore, InMemoryMappingStore, InMemoryUsageLog};
