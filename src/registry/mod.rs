//! Persisted instance registry (`instances.json`).
//!
//! The registry is the only durable record of which instances exist. It is
//! loaded on every read and rewritten wholesale on every write; all writes in
//! this process go through [`RegistryStore::with_registry_mut`].

mod migration;
mod store;
mod types;

pub use migration::migrate_registry_value;
pub use store::RegistryStore;
pub use types::{Instance, InstanceStatus, Registry, REGISTRY_SCHEMA_VERSION};
