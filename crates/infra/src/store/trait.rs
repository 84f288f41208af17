use std::sync::Arc;

use thiserror::Error;

use catalogerp_catalog::{EntityKind, HierarchyEntity, Product};
use catalogerp_core::{EntityId, ProductId};

/// Persistence operation error.
///
/// These are **infrastructure errors** as opposed to domain errors. The engine maps
/// them onto its own taxonomy: unique violations become conflicts, everything else a
/// transaction failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint rejected the write (duplicate sibling name, SKU, product name).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// An update targeted a row that does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Connectivity, deadlock, serialization or any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Transactional catalog persistence.
///
/// The store is the single source of truth and the only place uniqueness is enforced:
///
/// - at most one **active** entity per `(kind, parent_id, normalized name)`
/// - at most one **active** product per SKU and per normalized product name
///
/// Soft-deleted rows never participate in either constraint.
///
/// All reads and writes go through a [`CatalogTx`]; nothing is visible to other
/// transactions until [`CatalogTx::commit`] succeeds. Implementations provide at least
/// read-committed isolation.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn CatalogTx + '_>, StoreError>;
}

/// One open transaction against a [`CatalogStore`].
///
/// Dropping a transaction without committing discards its writes.
#[async_trait::async_trait]
pub trait CatalogTx: Send {
    /// Load an entity by id, soft-deleted or not.
    async fn entity(&mut self, id: EntityId) -> Result<Option<HierarchyEntity>, StoreError>;

    /// Active entities of `kind` directly under `parent_id` (`None` for roots), oldest first.
    async fn active_children(
        &mut self,
        kind: EntityKind,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<HierarchyEntity>, StoreError>;

    async fn insert_entity(&mut self, entity: &HierarchyEntity) -> Result<(), StoreError>;

    /// Overwrite an existing entity row (rename, status flip, soft delete).
    async fn update_entity(&mut self, entity: &HierarchyEntity) -> Result<(), StoreError>;

    /// Load a product by id, soft-deleted or not.
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn active_product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError>;

    /// Active products whose `kind` link points at `id`, oldest first.
    async fn active_products_referencing(
        &mut self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Vec<Product>, StoreError>;

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn CatalogTx + '_>, StoreError> {
        (**self).begin().await
    }
}
