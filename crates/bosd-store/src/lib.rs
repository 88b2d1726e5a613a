pub mod error;
pub mod kinds;
pub mod memory;
pub mod migration;
pub mod redb_store;
pub mod store;
pub mod typed;

pub use error::StoreError;
pub use kinds::{record_key, split_key, tenant_prefix, Kind, OPTIONS_KEY, SCHEMA_KEY};
pub use memory::InMemoryStore;
pub use migration::{migrate, MigrationReport, SCHEMA_VERSION};
pub use redb_store::RedbStore;
pub use store::{Mutator, Page, StateStore};
