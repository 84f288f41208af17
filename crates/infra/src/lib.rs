//! Catalog engine: persistence, resolution, ingestion, cascades and their collaborators.
//!
//! Pure naming and derivation rules live in `catalogerp-catalog`; this crate wires them to
//! storage, cache, blob storage and the audit trail.

pub mod audit;
pub mod blob;
pub mod cache;
pub mod cascade;
pub mod config;
pub mod context;
pub mod error;
pub mod ingestion;
pub mod resolver;
pub mod service;
pub mod store;


pub use cascade::{CascadeOutcome, CascadeUpdater};
pub use config::{CatalogConfig, ConflictPolicy};
pub use context::CatalogContext;
pub use error::{CatalogError, ErrorKind};
pub use ingestion::{IngestionPipeline, IngestionReport};
pub use resolver::{EntityResolver, Resolution, ResolutionAction};
pub use service::{CatalogService, ProductQueryOptions};
pub use store::{CatalogStore, CatalogTx, InMemoryCatalogStore, PostgresCatalogStore};
