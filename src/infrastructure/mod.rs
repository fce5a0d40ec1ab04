//! Adapters implementing the domain ports.

pub mod in_memory;
pub mod notifier;
pub mod replay_gateway;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
