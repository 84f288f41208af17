use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};

use catalogerp_catalog::{EntityKind, HierarchyEntity, Product, normalize};
use catalogerp_core::{EntityId, ProductId, SoftDelete};

use super::r#trait::{CatalogStore, CatalogTx, StoreError};

#[derive(Debug, Clone, Default)]
struct CatalogState {
    entities: HashMap<EntityId, HierarchyEntity>,
    products: HashMap<ProductId, Product>,
}

impl CatalogState {
    fn check_entity_unique(&self, entity: &HierarchyEntity) -> Result<(), StoreError> {
        if !entity.is_active() {
            return Ok(());
        }
        let key = normalize(&entity.name);
        let clash = self.entities.values().any(|other| {
            other.id != entity.id
                && other.is_active()
                && other.kind == entity.kind
                && other.parent_id == entity.parent_id
                && normalize(&other.name) == key
        });
        if clash {
            return Err(StoreError::UniqueViolation(format!(
                "catalog_entities_active_name_key: {} '{}'",
                entity.kind, entity.name
            )));
        }
        Ok(())
    }

    fn check_product_unique(&self, product: &Product) -> Result<(), StoreError> {
        if !product.is_active() {
            return Ok(());
        }
        let key = normalize(product.name());
        for other in self.products.values() {
            if other.id == product.id || !other.is_active() {
                continue;
            }
            if other.sku() == product.sku() {
                return Err(StoreError::UniqueViolation(format!(
                    "products_active_sku_key: '{}'",
                    product.sku()
                )));
            }
            if normalize(other.name()) == key {
                return Err(StoreError::UniqueViolation(format!(
                    "products_active_name_key: '{}'",
                    product.name()
                )));
            }
        }
        Ok(())
    }
}

/// In-memory catalog store.
///
/// Intended for tests/dev. Transactions are serialized: `begin()` takes an owned lock on
/// the state for the lifetime of the transaction and works on a copy, which replaces
/// the shared state only on commit.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: Arc<Mutex<CatalogState>>,
    fail_commits: AtomicBool,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with a backend error (outage simulation).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Insert an entity directly, bypassing transactions and constraints.
    pub async fn seed_entity(&self, entity: HierarchyEntity) {
        self.state.lock().await.entities.insert(entity.id, entity);
    }

    /// Insert a product directly, bypassing transactions and constraints.
    pub async fn seed_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Every stored entity of `kind` (including soft-deleted), oldest first.
    pub async fn entities(&self, kind: EntityKind) -> Vec<HierarchyEntity> {
        let state = self.state.lock().await;
        let mut out: Vec<_> = state
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Every stored product (including soft-deleted), oldest first.
    pub async fn products(&self) -> Vec<Product> {
        let state = self.state.lock().await;
        let mut out: Vec<_> = state.products.values().cloned().collect();
        out.sort_by_key(|p| p.id);
        out
    }
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx + '_>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            working,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<CatalogState>,
    working: CatalogState,
    fail_commit: bool,
}

#[async_trait::async_trait]
impl CatalogTx for InMemoryTx {
    async fn entity(&mut self, id: EntityId) -> Result<Option<HierarchyEntity>, StoreError> {
        Ok(self.working.entities.get(&id).cloned())
    }

    async fn active_children(
        &mut self,
        kind: EntityKind,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<HierarchyEntity>, StoreError> {
        let mut out: Vec<_> = self
            .working
            .entities
            .values()
            .filter(|e| e.kind == kind && e.parent_id == parent_id && e.is_active())
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        Ok(out)
    }

    async fn insert_entity(&mut self, entity: &HierarchyEntity) -> Result<(), StoreError> {
        if self.working.entities.contains_key(&entity.id) {
            return Err(StoreError::UniqueViolation(format!(
                "catalog_entities_pkey: {}",
                entity.id
            )));
        }
        self.working.check_entity_unique(entity)?;
        self.working.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    async fn update_entity(&mut self, entity: &HierarchyEntity) -> Result<(), StoreError> {
        if !self.working.entities.contains_key(&entity.id) {
            return Err(StoreError::NotFound(format!("{} {}", entity.kind, entity.id)));
        }
        self.working.check_entity_unique(entity)?;
        self.working.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn active_product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError> {
        Ok(self
            .working
            .products
            .values()
            .find(|p| p.is_active() && p.sku() == sku)
            .cloned())
    }

    async fn active_products_referencing(
        &mut self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Vec<Product>, StoreError> {
        let mut out: Vec<_> = self
            .working
            .products
            .values()
            .filter(|p| p.is_active() && p.links.references(kind, id))
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.working.products.contains_key(&product.id) {
            return Err(StoreError::UniqueViolation(format!(
                "products_pkey: {}",
                product.id
            )));
        }
        self.working.check_product_unique(product)?;
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if !self.working.products.contains_key(&product.id) {
            return Err(StoreError::NotFound(format!("product {}", product.id)));
        }
        self.working.check_product_unique(product)?;
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.fail_commit {
            return Err(StoreError::Backend("commit failed (simulated outage)".to_string()));
        }
        let InMemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
