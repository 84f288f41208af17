//! Single-entity catalog operations.
//!
//! Each mutation is one transaction followed by audit entries and cache invalidation.
//! Errors propagate directly to the caller; optional uploads degrade to warnings.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{instrument, warn};

use catalogerp_catalog::row::MAX_DESCRIPTION_LEN;
use catalogerp_catalog::{
    DerivationPath, DerivedIdentity, EntityKind, EntityRef, EntityStatus, HierarchyEntity, Pricing,
    Product, ProductRow, ProductStatus,
};
use catalogerp_core::{EntityId, ProductId, SoftDelete, UserId};

use crate::audit::{AuditAction, AuditEntry};
use crate::blob::Upload;
use crate::cache::CacheScope;
use crate::cascade::{self, CascadeOutcome};
use crate::context::CatalogContext;
use crate::error::CatalogError;
use crate::ingestion::{self, EntityOutcome, ProductAction, RowSuccess};
use crate::resolver::{EntityResolver, Resolution, load_active};
use crate::store::{CatalogStore, CatalogTx};

/// A result plus the non-fatal problems met on the way (failed optional uploads).
#[derive(Debug, Clone, PartialEq)]
pub struct WithWarnings<T> {
    pub value: T,
    pub warnings: Vec<CatalogError>,
}

#[derive(Debug, Clone)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub parent_id: Option<EntityId>,
    pub name: String,
    pub description: Option<String>,
    pub status: EntityStatus,
    pub logo: Option<Upload>,
}

impl NewEntity {
    pub fn new(kind: EntityKind, parent_id: Option<EntityId>, name: impl Into<String>) -> Self {
        Self {
            kind,
            parent_id,
            name: name.into(),
            description: None,
            status: EntityStatus::Active,
            logo: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_logo(mut self, logo: Upload) -> Self {
        self.logo = Some(logo);
        self
    }
}

/// Fields to change on an entity; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct EntityChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<EntityStatus>,
    pub logo: Option<Upload>,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub row: ProductRow,
    /// Uploaded before the transaction; URLs are appended to `row.images`.
    pub uploads: Vec<Upload>,
}

/// Fields to change on a product; `None` leaves a field untouched.
///
/// Changing any of the derivation ids regenerates the product name and SKU.
#[derive(Debug, Clone, Default)]
pub struct ProductChanges {
    pub pricing: Option<Pricing>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub status: Option<ProductStatus>,
    pub images: Option<Vec<String>>,
    pub uploads: Vec<Upload>,
    pub brand_id: Option<EntityId>,
    pub variant_id: Option<EntityId>,
    pub pack_size_id: Option<EntityId>,
    pub pack_type_id: Option<EntityId>,
    pub category_id: Option<EntityId>,
    pub subcategory_id: Option<EntityId>,
}

impl ProductChanges {
    fn touches_derivation(&self) -> bool {
        self.brand_id.is_some()
            || self.variant_id.is_some()
            || self.pack_size_id.is_some()
            || self.pack_type_id.is_some()
    }

    fn touches_category(&self) -> bool {
        self.category_id.is_some() || self.subcategory_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreation {
    pub product: Product,
    pub action: ProductAction,
    pub entities: Vec<EntityOutcome>,
}

/// Which relations [`CatalogService::get_product`] loads alongside the product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductQueryOptions {
    pub include_brand: bool,
    pub include_variant: bool,
    pub include_pack_size: bool,
    pub include_pack_type: bool,
    pub include_category: bool,
    pub include_subcategory: bool,
}

impl ProductQueryOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            include_brand: true,
            include_variant: true,
            include_pack_size: true,
            include_pack_type: true,
            include_category: true,
            include_subcategory: true,
        }
    }

    fn includes(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Brand => self.include_brand,
            EntityKind::Variant => self.include_variant,
            EntityKind::PackSize => self.include_pack_size,
            EntityKind::PackType => self.include_pack_type,
            EntityKind::Category => self.include_category,
            EntityKind::Subcategory => self.include_subcategory,
            EntityKind::Manufacturer => false,
        }
    }
}

/// A product with the relations requested through [`ProductQueryOptions`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub product: Product,
    pub brand: Option<HierarchyEntity>,
    pub variant: Option<HierarchyEntity>,
    pub pack_size: Option<HierarchyEntity>,
    pub pack_type: Option<HierarchyEntity>,
    pub category: Option<HierarchyEntity>,
    pub subcategory: Option<HierarchyEntity>,
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Box<dyn CatalogTx + '_>, result: Result<T, CatalogError>) -> Result<T, CatalogError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Interactive create/read/update/delete over the catalog.
pub struct CatalogService<S> {
    store: S,
    ctx: CatalogContext,
}

impl<S: CatalogStore> CatalogService<S> {
    pub fn new(store: S, ctx: CatalogContext) -> Self {
        Self { store, ctx }
    }

    async fn upload(&self, upload: Upload, warnings: &mut Vec<CatalogError>) -> Option<String> {
        let file_name = upload.file_name.clone();
        match self.ctx.blob.upload(upload).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(file = %file_name, error = %e, "upload failed");
                warnings.push(e.into());
                None
            }
        }
    }

    /// Find-or-create one entity by name under `parent_id`.
    ///
    /// An existing active sibling with the same normalized name is returned as
    /// referenced and left unchanged.
    #[instrument(skip(self, new), fields(kind = %new.kind, actor = %actor))]
    pub async fn create_entity(
        &self,
        new: NewEntity,
        actor: UserId,
    ) -> Result<WithWarnings<Resolution>, CatalogError> {
        if let Some(d) = &new.description {
            check_description(d)?;
        }
        let mut warnings = Vec::new();
        let logo_url = match new.logo.clone() {
            Some(logo) => self.upload(logo, &mut warnings).await,
            None => None,
        };

        let mut tx = self.store.begin().await?;
        let result = create_entity_in(&mut *tx, &new, logo_url.clone(), actor).await;
        let resolution = finish(tx, result).await?;

        if let Some(url) = logo_url.filter(|_| !resolution.was_created()) {
            warn!(entity_id = %resolution.entity.id, %url, "entity already exists; logo not applied");
            warnings.push(CatalogError::conflict(format!(
                "{} '{}' already exists; uploaded logo {url} was not applied",
                resolution.entity.kind, resolution.entity.name
            )));
        }

        if resolution.was_created() {
            let entity = &resolution.entity;
            self.ctx.audit.record(
                AuditEntry::new(AuditAction::Create, entity.kind.as_str(), entity.id, actor)
                    .with_metadata(serde_json::json!({ "name": entity.name, "parent_id": entity.parent_id })),
            );
            self.ctx.cache.invalidate([CacheScope::Entity(entity.kind)]).await;
        }
        Ok(WithWarnings {
            value: resolution,
            warnings,
        })
    }

    /// Update an entity. A name change is applied with the rename cascade, in the same
    /// transaction as the other field changes.
    #[instrument(skip(self, changes), fields(entity_id = %id, actor = %actor))]
    pub async fn update_entity(
        &self,
        id: EntityId,
        changes: EntityChanges,
        actor: UserId,
    ) -> Result<WithWarnings<HierarchyEntity>, CatalogError> {
        if let Some(d) = &changes.description {
            check_description(d)?;
        }
        let mut warnings = Vec::new();
        let logo_url = match changes.logo.clone() {
            Some(logo) => self.upload(logo, &mut warnings).await,
            None => None,
        };

        let mut tx = self.store.begin().await?;
        let result = update_entity_in(&mut *tx, id, &changes, logo_url, actor).await;
        let (entity, cascade, fields_changed) = finish(tx, result).await?;

        if let Some(outcome) = &cascade {
            cascade::publish(&self.ctx, outcome, actor).await;
        }
        if fields_changed {
            self.ctx.audit.record(
                AuditEntry::new(AuditAction::Update, entity.kind.as_str(), entity.id, actor)
                    .with_metadata(serde_json::json!({ "status": entity.status, "logo_url": entity.logo_url })),
            );
            self.ctx.cache.invalidate([CacheScope::Entity(entity.kind)]).await;
        }
        Ok(WithWarnings {
            value: entity,
            warnings,
        })
    }

    /// Soft-delete an entity. Rejected while active children or active products
    /// reference it.
    #[instrument(skip(self), fields(entity_id = %id, actor = %actor))]
    pub async fn delete_entity(&self, id: EntityId, actor: UserId) -> Result<HierarchyEntity, CatalogError> {
        let mut tx = self.store.begin().await?;
        let result = delete_entity_in(&mut *tx, id, actor).await;
        let entity = finish(tx, result).await?;

        self.ctx.audit.record(
            AuditEntry::new(AuditAction::Delete, entity.kind.as_str(), entity.id, actor)
                .with_metadata(serde_json::json!({ "name": entity.name })),
        );
        self.ctx.cache.invalidate([CacheScope::Entity(entity.kind)]).await;
        Ok(entity)
    }

    /// Create one product the way ingestion creates a row, but with errors propagated.
    #[instrument(skip(self, new), fields(actor = %actor))]
    pub async fn create_product(
        &self,
        new: NewProduct,
        actor: UserId,
    ) -> Result<WithWarnings<ProductCreation>, CatalogError> {
        let NewProduct { mut row, uploads } = new;
        row.validate()?;
        let mut warnings = Vec::new();
        for upload in uploads {
            if let Some(url) = self.upload(upload, &mut warnings).await {
                row.images.push(url);
            }
        }

        let mut resolver = EntityResolver::new();
        let mut tx = self.store.begin().await?;
        let result = ingestion::write_row(&mut *tx, &mut resolver, &row, self.ctx.config.conflict_policy, actor).await;
        let success: RowSuccess = finish(tx, result).await?;

        ingestion::audit_row(&self.ctx, &success, actor);
        let mut scopes: Vec<CacheScope> = success
            .resolutions
            .iter()
            .filter(|r| r.was_created())
            .map(|r| CacheScope::Entity(r.entity.kind))
            .collect();
        scopes.push(CacheScope::Products);
        self.ctx.cache.invalidate(scopes).await;

        Ok(WithWarnings {
            value: ProductCreation {
                entities: success.resolutions.iter().map(EntityOutcome::from).collect(),
                product: success.product,
                action: success.action,
            },
            warnings,
        })
    }

    #[instrument(skip(self, changes), fields(product_id = %id, actor = %actor))]
    pub async fn update_product(
        &self,
        id: ProductId,
        changes: ProductChanges,
        actor: UserId,
    ) -> Result<WithWarnings<Product>, CatalogError> {
        if let Some(d) = &changes.description {
            check_description(d)?;
        }
        let mut warnings = Vec::new();
        let mut uploaded = Vec::new();
        for upload in changes.uploads.iter().cloned() {
            if let Some(url) = self.upload(upload, &mut warnings).await {
                uploaded.push(url);
            }
        }

        let mut tx = self.store.begin().await?;
        let result = update_product_in(&mut *tx, id, &changes, uploaded, actor).await;
        let (product, old_sku) = finish(tx, result).await?;

        self.ctx.audit.record(
            AuditEntry::new(AuditAction::Update, "product", product.id, actor).with_metadata(serde_json::json!({
                "sku": product.sku(),
                "old_sku": old_sku,
            })),
        );
        self.ctx.cache.invalidate([CacheScope::Products]).await;
        Ok(WithWarnings {
            value: product,
            warnings,
        })
    }

    #[instrument(skip(self), fields(product_id = %id, actor = %actor))]
    pub async fn delete_product(&self, id: ProductId, actor: UserId) -> Result<Product, CatalogError> {
        let mut tx = self.store.begin().await?;
        let result = delete_product_in(&mut *tx, id, actor).await;
        let product = finish(tx, result).await?;

        self.ctx.audit.record(
            AuditEntry::new(AuditAction::Delete, "product", product.id, actor)
                .with_metadata(serde_json::json!({ "sku": product.sku() })),
        );
        self.ctx.cache.invalidate([CacheScope::Products]).await;
        Ok(product)
    }

    /// Load an entity by id, soft-deleted or not.
    pub async fn get_entity(&self, id: EntityId) -> Result<HierarchyEntity, CatalogError> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .entity(id)
            .await
            .map_err(CatalogError::from)
            .and_then(|e| e.ok_or_else(|| CatalogError::not_found(format!("entity {id}"))));
        finish(tx, result).await
    }

    /// Load a product by id, soft-deleted or not, with the requested relations.
    pub async fn get_product(
        &self,
        id: ProductId,
        options: ProductQueryOptions,
    ) -> Result<ProductView, CatalogError> {
        let mut tx = self.store.begin().await?;
        let result = product_view_in(&mut *tx, id, options).await;
        finish(tx, result).await
    }

    /// Active children of `kind` under `parent_id` (`None` for roots).
    pub async fn list_children(
        &self,
        kind: EntityKind,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<HierarchyEntity>, CatalogError> {
        if kind.parent().is_some() != parent_id.is_some() {
            return Err(CatalogError::validation(format!(
                "{kind} listing needs {} parent",
                if kind.parent().is_some() { "a" } else { "no" }
            )));
        }
        let mut tx = self.store.begin().await?;
        let result = tx.active_children(kind, parent_id).await.map_err(CatalogError::from);
        finish(tx, result).await
    }
}

fn check_description(description: &str) -> Result<(), CatalogError> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(CatalogError::validation(format!(
            "description is too long (max {MAX_DESCRIPTION_LEN} chars)"
        )));
    }
    Ok(())
}

async fn create_entity_in(
    tx: &mut dyn CatalogTx,
    new: &NewEntity,
    logo_url: Option<String>,
    actor: UserId,
) -> Result<Resolution, CatalogError> {
    let parent = match new.parent_id {
        Some(pid) => Some(
            tx.entity(pid)
                .await?
                .ok_or_else(|| CatalogError::not_found(format!("parent {pid}")))?,
        ),
        None => None,
    };

    let mut resolver = EntityResolver::new();
    let mut resolution = resolver
        .resolve(tx, new.kind, parent.as_ref(), &EntityRef::Name(new.name.clone()), actor)
        .await?;

    if resolution.was_created()
        && (new.description.is_some() || logo_url.is_some() || new.status != EntityStatus::Active)
    {
        let entity = resolution.entity.clone();
        let entity = entity
            .with_description(new.description.clone())
            .with_logo_url(logo_url)
            .with_status(new.status);
        tx.update_entity(&entity).await?;
        resolution.entity = entity;
    }
    Ok(resolution)
}

async fn update_entity_in(
    tx: &mut dyn CatalogTx,
    id: EntityId,
    changes: &EntityChanges,
    logo_url: Option<String>,
    actor: UserId,
) -> Result<(HierarchyEntity, Option<CascadeOutcome>, bool), CatalogError> {
    let (mut entity, outcome) = match &changes.name {
        Some(name) => {
            let outcome = cascade::apply(tx, id, name, actor).await?;
            (outcome.entity.clone(), Some(outcome).filter(|o| o.renamed))
        }
        None => {
            let entity = tx
                .entity(id)
                .await?
                .filter(|e| e.is_active())
                .ok_or_else(|| CatalogError::not_found(format!("entity {id}")))?;
            (entity, None)
        }
    };

    let mut changed = false;
    if let Some(d) = &changes.description {
        let d = Some(d.trim().to_string()).filter(|d| !d.is_empty());
        if entity.description != d {
            entity.description = d;
            changed = true;
        }
    }
    if let Some(status) = changes.status {
        if entity.status != status {
            entity.status = status;
            changed = true;
        }
    }
    if logo_url.is_some() && entity.logo_url != logo_url {
        entity.logo_url = logo_url;
        changed = true;
    }
    if changed {
        entity.stamp.touch(actor, Utc::now());
        tx.update_entity(&entity).await?;
    }
    Ok((entity, outcome, changed))
}

async fn delete_entity_in(
    tx: &mut dyn CatalogTx,
    id: EntityId,
    actor: UserId,
) -> Result<HierarchyEntity, CatalogError> {
    let mut entity = tx
        .entity(id)
        .await?
        .filter(|e| e.is_active())
        .ok_or_else(|| CatalogError::not_found(format!("entity {id}")))?;

    for child in entity.kind.children() {
        let children = tx.active_children(*child, Some(entity.id)).await?;
        if !children.is_empty() {
            return Err(CatalogError::conflict(format!(
                "{} '{}' still has {} active {child} entries",
                entity.kind,
                entity.name,
                children.len()
            )));
        }
    }
    let products = tx.active_products_referencing(entity.kind, entity.id).await?;
    if !products.is_empty() {
        return Err(CatalogError::conflict(format!(
            "{} '{}' is referenced by {} active products",
            entity.kind,
            entity.name,
            products.len()
        )));
    }

    entity.stamp.mark_deleted(actor, Utc::now());
    tx.update_entity(&entity).await?;
    Ok(entity)
}

async fn update_product_in(
    tx: &mut dyn CatalogTx,
    id: ProductId,
    changes: &ProductChanges,
    uploaded: Vec<String>,
    actor: UserId,
) -> Result<(Product, String), CatalogError> {
    let mut product = tx
        .product(id)
        .await?
        .filter(|p| p.is_active())
        .ok_or_else(|| CatalogError::not_found(format!("product {id}")))?;
    let old_sku = product.sku().to_string();
    let now = Utc::now();

    if let Some(pricing) = &changes.pricing {
        product.pricing = Pricing::new(pricing.price, pricing.discount)?;
    }
    if let Some(d) = &changes.description {
        product.description = Some(d.trim().to_string()).filter(|d| !d.is_empty());
    }
    if let Some(t) = &changes.thumbnail {
        product.thumbnail = Some(t.trim().to_string()).filter(|t| !t.is_empty());
    }
    if let Some(status) = changes.status {
        product.status = status;
    }
    if let Some(images) = &changes.images {
        product.images = images.clone();
    }
    product.images.extend(uploaded);

    if changes.touches_category() {
        let category_id = changes.category_id.unwrap_or(product.links.category_id);
        let category = load_active(tx, EntityKind::Category, category_id).await?;
        let subcategory_id = match changes.subcategory_id {
            Some(sid) => Some(sid),
            // A new category drops a subcategory that belonged to the old one.
            None if changes.category_id.is_some() => None,
            None => product.links.subcategory_id,
        };
        if let Some(sid) = subcategory_id {
            let sub = load_active(tx, EntityKind::Subcategory, sid).await?;
            if sub.parent_id != Some(category.id) {
                return Err(CatalogError::validation(format!(
                    "subcategory '{}' does not belong to category '{}'",
                    sub.name, category.name
                )));
            }
        }
        product.links.category_id = category.id;
        product.links.subcategory_id = subcategory_id;
    }

    if changes.touches_derivation() {
        let links = &product.links;
        let brand = load_active(tx, EntityKind::Brand, changes.brand_id.unwrap_or(links.brand_id)).await?;
        let variant = load_active(tx, EntityKind::Variant, changes.variant_id.unwrap_or(links.variant_id)).await?;
        let pack_size =
            load_active(tx, EntityKind::PackSize, changes.pack_size_id.unwrap_or(links.pack_size_id)).await?;
        let pack_type =
            load_active(tx, EntityKind::PackType, changes.pack_type_id.unwrap_or(links.pack_type_id)).await?;

        for (child, parent) in [(&variant, &brand), (&pack_size, &variant), (&pack_type, &variant)] {
            if child.parent_id != Some(parent.id) {
                return Err(CatalogError::validation(format!(
                    "{} '{}' does not belong to {} '{}'",
                    child.kind, child.name, parent.kind, parent.name
                )));
            }
        }
        let manufacturer_id = brand
            .parent_id
            .ok_or_else(|| CatalogError::validation(format!("brand '{}' has no manufacturer", brand.name)))?;

        let path = DerivationPath::from_entities(&brand, &variant, &pack_size, &pack_type)?;
        let identity = DerivedIdentity::derive(&path)?;
        product.links.manufacturer_id = manufacturer_id;
        product.links.brand_id = brand.id;
        product.links.variant_id = variant.id;
        product.links.pack_size_id = pack_size.id;
        product.links.pack_type_id = pack_type.id;
        product.apply_identity(identity, actor, now);
    }

    product.stamp.touch(actor, now);
    tx.update_product(&product).await.map_err(ingestion::product_conflict)?;
    Ok((product, old_sku))
}

async fn delete_product_in(tx: &mut dyn CatalogTx, id: ProductId, actor: UserId) -> Result<Product, CatalogError> {
    let mut product = tx
        .product(id)
        .await?
        .filter(|p| p.is_active())
        .ok_or_else(|| CatalogError::not_found(format!("product {id}")))?;
    product.stamp.mark_deleted(actor, Utc::now());
    tx.update_product(&product).await?;
    Ok(product)
}

async fn product_view_in(
    tx: &mut dyn CatalogTx,
    id: ProductId,
    options: ProductQueryOptions,
) -> Result<ProductView, CatalogError> {
    let product = tx
        .product(id)
        .await?
        .ok_or_else(|| CatalogError::not_found(format!("product {id}")))?;

    let mut loaded: HashMap<EntityKind, HierarchyEntity> = HashMap::new();
    for kind in EntityKind::ALL {
        if !options.includes(kind) {
            continue;
        }
        if let Some(eid) = product.links.get(kind) {
            if let Some(entity) = tx.entity(eid).await? {
                loaded.insert(kind, entity);
            }
        }
    }

    Ok(ProductView {
        brand: loaded.remove(&EntityKind::Brand),
        variant: loaded.remove(&EntityKind::Variant),
        pack_size: loaded.remove(&EntityKind::PackSize),
        pack_type: loaded.remove(&EntityKind::PackType),
        category: loaded.remove(&EntityKind::Category),
        subcategory: loaded.remove(&EntityKind::Subcategory),
        product,
    })
}
