//! Catalog persistence boundary.
//!
//! The engine talks to storage only through [`CatalogStore`] / [`CatalogTx`], so the
//! same resolution, ingestion and cascade code runs against the in-memory store in
//! tests and against Postgres in production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryCatalogStore;
pub use postgres::PostgresCatalogStore;
pub use r#trait::{CatalogStore, CatalogTx, StoreError};
