//! Storage Manager (C6): dual-store facade over an embedded relational
//! metadata store and an append-optimized time-series store.

pub mod facade;
pub mod metadata;
pub mod migrations;
pub mod timeseries;

pub use facade::{StorageManager, StoreHealth};
pub use metadata::MetadataStore;
pub use timeseries::{QueryFilter, TimeSeriesStore};
