//! Rename propagation.
//!
//! Renaming a brand, variant, pack size or pack type regenerates the name and SKU of
//! every active product that references it, in the same transaction as the rename.
//! Either everything commits or nothing does.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use catalogerp_catalog::{
    CanonicalName, DerivationPath, DerivedIdentity, EntityKind, HierarchyEntity, Product,
};
use catalogerp_core::{EntityId, ProductId, SoftDelete, UserId};

use crate::audit::{AuditAction, AuditEntry};
use crate::cache::CacheScope;
use crate::context::CatalogContext;
use crate::error::CatalogError;
use crate::ingestion::product_conflict;
use crate::store::{CatalogStore, CatalogTx, StoreError};

/// One regenerated product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegeneratedProduct {
    pub product_id: ProductId,
    pub old_name: String,
    pub old_sku: String,
    pub new_name: String,
    pub new_sku: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub entity: HierarchyEntity,
    pub previous_name: String,
    /// False when the new name canonicalizes to the current one.
    pub renamed: bool,
    pub regenerated: Vec<RegeneratedProduct>,
}

/// Applies renames and regenerates dependent product identities.
pub struct CascadeUpdater<S> {
    store: S,
    ctx: CatalogContext,
}

impl<S: CatalogStore> CascadeUpdater<S> {
    pub fn new(store: S, ctx: CatalogContext) -> Self {
        Self { store, ctx }
    }

    /// Rename `entity_id` in its own transaction, then audit and invalidate caches.
    #[instrument(skip(self, new_name), fields(entity_id = %entity_id, actor = %actor))]
    pub async fn rename(
        &self,
        entity_id: EntityId,
        new_name: &str,
        actor: UserId,
    ) -> Result<CascadeOutcome, CatalogError> {
        let mut tx = self.store.begin().await?;
        let outcome = match apply(&mut *tx, entity_id, new_name, actor).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                warn!(error_kind = %e.kind(), error = %e, "rename aborted");
                return Err(e);
            }
        };
        tx.commit().await?;

        publish(&self.ctx, &outcome, actor).await;
        Ok(outcome)
    }
}

/// Audit entries and cache invalidation for a committed rename.
pub(crate) async fn publish(ctx: &CatalogContext, outcome: &CascadeOutcome, actor: UserId) {
    if !outcome.renamed {
        return;
    }
    let entity = &outcome.entity;
    ctx.audit.record(
        AuditEntry::new(AuditAction::Rename, entity.kind.as_str(), entity.id, actor).with_metadata(
            serde_json::json!({
                "old_name": outcome.previous_name,
                "new_name": entity.name,
                "products_regenerated": outcome.regenerated.len(),
            }),
        ),
    );
    for p in &outcome.regenerated {
        ctx.audit.record(
            AuditEntry::new(AuditAction::Cascade, "product", p.product_id, actor).with_metadata(
                serde_json::json!({
                    "trigger": { "kind": entity.kind, "id": entity.id },
                    "old_name": p.old_name,
                    "old_sku": p.old_sku,
                    "new_name": p.new_name,
                    "new_sku": p.new_sku,
                }),
            ),
        );
    }

    let mut scopes = vec![CacheScope::Entity(entity.kind)];
    if !outcome.regenerated.is_empty() {
        scopes.push(CacheScope::Products);
    }
    ctx.cache.invalidate(scopes).await;
}

/// Rename inside a caller-owned transaction. The caller commits or rolls back.
pub async fn apply(
    tx: &mut dyn CatalogTx,
    entity_id: EntityId,
    new_name: &str,
    actor: UserId,
) -> Result<CascadeOutcome, CatalogError> {
    let mut entity = tx
        .entity(entity_id)
        .await?
        .filter(|e| e.is_active())
        .ok_or_else(|| CatalogError::not_found(format!("entity {entity_id}")))?;

    let name = CanonicalName::new(new_name);
    if name.is_empty() {
        return Err(CatalogError::validation(format!("{} name is empty", entity.kind)));
    }
    let previous_name = entity.name.clone();
    if name.display() == entity.name {
        return Ok(CascadeOutcome {
            entity,
            previous_name,
            renamed: false,
            regenerated: Vec::new(),
        });
    }

    let siblings = tx.active_children(entity.kind, entity.parent_id).await?;
    if let Some(clash) = siblings
        .iter()
        .find(|s| s.id != entity.id && name.matches(&s.name))
    {
        return Err(CatalogError::conflict(format!(
            "{} '{}' already exists in this scope",
            clash.kind, clash.name
        )));
    }

    let now = Utc::now();
    entity.rename(name.into_display(), actor, now);
    tx.update_entity(&entity).await.map_err(|e| match e {
        StoreError::UniqueViolation(_) => CatalogError::conflict(format!(
            "{} '{}' already exists in this scope",
            entity.kind, entity.name
        )),
        other => other.into(),
    })?;

    let regenerated = if entity.kind.derives_product_identity() {
        regenerate_products(tx, &entity, actor).await?
    } else {
        Vec::new()
    };

    info!(
        kind = %entity.kind,
        entity_id = %entity.id,
        old_name = %previous_name,
        new_name = %entity.name,
        products = regenerated.len(),
        "entity renamed"
    );
    Ok(CascadeOutcome {
        entity,
        previous_name,
        renamed: true,
        regenerated,
    })
}

async fn regenerate_products(
    tx: &mut dyn CatalogTx,
    renamed: &HierarchyEntity,
    actor: UserId,
) -> Result<Vec<RegeneratedProduct>, CatalogError> {
    let products = tx.active_products_referencing(renamed.kind, renamed.id).await?;
    let mut lookup: HashMap<EntityId, HierarchyEntity> = HashMap::new();
    lookup.insert(renamed.id, renamed.clone());

    let now = Utc::now();
    let mut regenerated = Vec::with_capacity(products.len());
    for mut product in products {
        let identity = derive_current(tx, &mut lookup, &product).await?;
        let old = product.identity();
        if !product.apply_identity(identity, actor, now) {
            continue;
        }
        tx.update_product(&product).await.map_err(product_conflict)?;
        debug!(product_id = %product.id, old_sku = %old.sku, new_sku = %product.sku(), "product regenerated");
        regenerated.push(RegeneratedProduct {
            product_id: product.id,
            old_name: old.name,
            old_sku: old.sku,
            new_name: product.name().to_string(),
            new_sku: product.sku().to_string(),
        });
    }
    Ok(regenerated)
}

/// Name/SKU of `product` from the current names of its derivation entities.
pub(crate) async fn derive_current(
    tx: &mut dyn CatalogTx,
    lookup: &mut HashMap<EntityId, HierarchyEntity>,
    product: &Product,
) -> Result<DerivedIdentity, CatalogError> {
    let links = &product.links;
    for (kind, id) in [
        (EntityKind::Brand, links.brand_id),
        (EntityKind::Variant, links.variant_id),
        (EntityKind::PackSize, links.pack_size_id),
        (EntityKind::PackType, links.pack_type_id),
    ] {
        if !lookup.contains_key(&id) {
            let entity = tx
                .entity(id)
                .await?
                .filter(|e| e.kind == kind)
                .ok_or_else(|| CatalogError::not_found(format!("{kind} {id} of product {}", product.id)))?;
            lookup.insert(id, entity);
        }
    }
    let get = |id: EntityId| {
        lookup
            .get(&id)
            .ok_or_else(|| CatalogError::not_found(format!("entity {id}")))
    };
    let path = DerivationPath::from_entities(
        get(links.brand_id)?,
        get(links.variant_id)?,
        get(links.pack_size_id)?,
        get(links.pack_type_id)?,
    )?;
    Ok(DerivedIdentity::derive(&path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::blob::InMemoryBlobStorage;
    use crate::cache::InMemoryCacheStore;
    use crate::config::CatalogConfig;
    use crate::store::InMemoryCatalogStore;
    use catalogerp_catalog::{Pricing, ProductLinks};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<InMemoryCatalogStore>,
        audit: Arc<InMemoryAuditSink>,
        cascade: CascadeUpdater<Arc<InMemoryCatalogStore>>,
        actor: UserId,
        manufacturer: HierarchyEntity,
        brand: HierarchyEntity,
        variant: HierarchyEntity,
        size: HierarchyEntity,
        pack: HierarchyEntity,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCatalogStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let ctx = CatalogContext::new(
            CatalogConfig::default(),
            audit.clone(),
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryBlobStorage::default()),
        );
        let actor = UserId::new();
        let now = Utc::now();
        let manufacturer = HierarchyEntity::new(EntityKind::Manufacturer, None, "Nestle", actor, now);
        let brand = HierarchyEntity::new(EntityKind::Brand, Some(manufacturer.id), "Maggi", actor, now);
        let variant = HierarchyEntity::new(EntityKind::Variant, Some(brand.id), "Chicken", actor, now);
        let size = HierarchyEntity::new(EntityKind::PackSize, Some(variant.id), "70g", actor, now);
        let pack = HierarchyEntity::new(EntityKind::PackType, Some(variant.id), "Box", actor, now);
        for e in [&manufacturer, &brand, &variant, &size, &pack] {
            store.seed_entity(e.clone()).await;
        }
        Fixture {
            cascade: CascadeUpdater::new(store.clone(), ctx),
            store,
            audit,
            actor,
            manufacturer,
            brand,
            variant,
            size,
            pack,
        }
    }

    fn product_for(f: &Fixture, size: &HierarchyEntity) -> Product {
        let path = DerivationPath::from_entities(&f.brand, &f.variant, size, &f.pack).unwrap();
        let links = ProductLinks {
            manufacturer_id: f.manufacturer.id,
            brand_id: f.brand.id,
            variant_id: f.variant.id,
            pack_size_id: size.id,
            pack_type_id: f.pack.id,
            category_id: EntityId::new(),
            subcategory_id: None,
        };
        Product::new(DerivedIdentity::derive(&path).unwrap(), links, Pricing::default(), f.actor, Utc::now())
    }

    #[tokio::test]
    async fn pack_type_rename_regenerates_products() {
        let f = fixture().await;
        f.store.seed_product(product_for(&f, &f.size)).await;

        let outcome = f.cascade.rename(f.pack.id, "carton", f.actor).await.unwrap();
        assert!(outcome.renamed);
        assert_eq!(outcome.entity.name, "Carton");
        assert_eq!(outcome.regenerated.len(), 1);
        assert_eq!(outcome.regenerated[0].new_sku, "MAGGI-CHICKEN-70G-CARTON");

        let products = f.store.products().await;
        assert_eq!(products[0].name(), "Maggi Chicken 70g (Carton)");
        let actions: Vec<_> = f.audit.entries().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Rename, AuditAction::Cascade]);
    }

    #[tokio::test]
    async fn same_canonical_name_is_a_no_op() {
        let f = fixture().await;
        let outcome = f.cascade.rename(f.brand.id, "  maggi ", f.actor).await.unwrap();
        assert!(!outcome.renamed);
        assert!(f.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn sibling_clash_is_conflict() {
        let f = fixture().await;
        let other = HierarchyEntity::new(EntityKind::PackSize, Some(f.variant.id), "120g", f.actor, Utc::now());
        f.store.seed_entity(other).await;

        let err = f.cascade.rename(f.size.id, "120G", f.actor).await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
        let sizes = f.store.entities(EntityKind::PackSize).await;
        assert!(sizes.iter().any(|s| s.name == "70g"));
    }

    #[tokio::test]
    async fn manufacturer_rename_touches_no_products() {
        let f = fixture().await;
        let product = product_for(&f, &f.size);
        let sku = product.sku().to_string();
        f.store.seed_product(product).await;

        let outcome = f.cascade.rename(f.manufacturer.id, "Nestle SA", f.actor).await.unwrap();
        assert!(outcome.regenerated.is_empty());
        assert_eq!(f.store.products().await[0].sku(), sku);
    }

    #[tokio::test]
    async fn deleted_entities_cannot_be_renamed() {
        let f = fixture().await;
        let mut gone = f.brand.clone();
        gone.stamp.mark_deleted(f.actor, Utc::now());
        f.store.seed_entity(gone).await;
        let err = f.cascade.rename(f.brand.id, "Maggi2000", f.actor).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }
}
