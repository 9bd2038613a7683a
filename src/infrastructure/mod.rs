//! Adapters for the domain ports: storage backends, the credential cipher
//! and the default collaborators.

pub mod cipher;
pub mod collaborators;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
