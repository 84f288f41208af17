//! Bulk product ingestion.
//!
//! Rows are processed strictly in input order, one transaction per row. A failing row is
//! rolled back and reported; the batch carries on. Hierarchy entities created by earlier
//! rows are reused by later ones through the resolver's batch cache.

pub mod csv;

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use catalogerp_catalog::{
    DerivationPath, DerivedIdentity, EntityKind, Product, ProductLinks, ProductRow,
};
use catalogerp_core::{EntityId, ProductId, UserId};

use crate::audit::{AuditAction, AuditEntry};
use crate::cache::CacheScope;
use crate::config::ConflictPolicy;
use crate::context::CatalogContext;
use crate::error::{CatalogError, ErrorKind};
use crate::resolver::{EntityResolver, Resolution, ResolutionAction};
use crate::store::{CatalogStore, CatalogTx, StoreError};

/// What happened to the product of a successful row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductAction {
    Created,
    /// An active product already owned the SKU and was updated in place.
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row: usize,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResult {
    pub row: usize,
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
    pub price: Decimal,
    pub discount: Option<Decimal>,
    pub action: ProductAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOutcome {
    pub kind: EntityKind,
    pub id: EntityId,
    pub name: String,
    pub action: ResolutionAction,
}

impl From<&Resolution> for EntityOutcome {
    fn from(r: &Resolution) -> Self {
        Self {
            kind: r.entity.kind,
            id: r.entity.id,
            name: r.entity.name.clone(),
            action: r.action,
        }
    }
}

/// Per-row result. Failed rows carry no entity outcomes: whatever they resolved was
/// rolled back with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    pub row: usize,
    pub success: bool,
    pub product_id: Option<ProductId>,
    pub sku: Option<String>,
    pub action: Option<ProductAction>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub entities: Vec<EntityOutcome>,
}

/// Summary of one ingestion call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub total_rows: usize,
    pub successful_products: usize,
    pub skipped_rows: usize,
    pub errors: Vec<RowError>,
    pub manufacturers_created: usize,
    pub brands_created: usize,
    pub variants_created: usize,
    pub pack_sizes_created: usize,
    pub pack_types_created: usize,
    pub categories_created: usize,
    pub subcategories_created: usize,
    /// Resolutions that reused an existing entity, per kind.
    pub referenced: BTreeMap<EntityKind, usize>,
    pub products: Vec<ProductResult>,
    pub rows: Vec<RowOutcome>,
}

impl IngestionReport {
    pub fn created(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Manufacturer => self.manufacturers_created,
            EntityKind::Brand => self.brands_created,
            EntityKind::Variant => self.variants_created,
            EntityKind::PackSize => self.pack_sizes_created,
            EntityKind::PackType => self.pack_types_created,
            EntityKind::Category => self.categories_created,
            EntityKind::Subcategory => self.subcategories_created,
        }
    }

    pub fn referenced(&self, kind: EntityKind) -> usize {
        self.referenced.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_created(&self) -> usize {
        EntityKind::ALL.iter().map(|k| self.created(*k)).sum()
    }

    fn count_created(&mut self, kind: EntityKind) {
        let counter = match kind {
            EntityKind::Manufacturer => &mut self.manufacturers_created,
            EntityKind::Brand => &mut self.brands_created,
            EntityKind::Variant => &mut self.variants_created,
            EntityKind::PackSize => &mut self.pack_sizes_created,
            EntityKind::PackType => &mut self.pack_types_created,
            EntityKind::Category => &mut self.categories_created,
            EntityKind::Subcategory => &mut self.subcategories_created,
        };
        *counter += 1;
    }

    fn record_success(&mut self, row: usize, success: RowSuccess) {
        for r in &success.resolutions {
            match r.action {
                ResolutionAction::Created => self.count_created(r.entity.kind),
                ResolutionAction::Referenced => *self.referenced.entry(r.entity.kind).or_default() += 1,
            }
        }
        self.successful_products += 1;
        self.products.push(ProductResult {
            row,
            product_id: success.product.id,
            name: success.product.name().to_string(),
            sku: success.product.sku().to_string(),
            price: success.product.pricing.price,
            discount: success.product.pricing.discount,
            action: success.action,
        });
        self.rows.push(RowOutcome {
            row,
            success: true,
            product_id: Some(success.product.id),
            sku: Some(success.product.sku().to_string()),
            action: Some(success.action),
            error: None,
            error_kind: None,
            entities: success.resolutions.iter().map(EntityOutcome::from).collect(),
        });
    }

    fn record_failure(&mut self, row: usize, err: &CatalogError) {
        self.skipped_rows += 1;
        self.errors.push(RowError {
            row,
            kind: err.kind(),
            message: err.to_string(),
        });
        self.rows.push(RowOutcome {
            row,
            success: false,
            product_id: None,
            sku: None,
            action: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            entities: Vec::new(),
        });
    }
}

/// A committed row.
pub(crate) struct RowSuccess {
    pub(crate) product: Product,
    pub(crate) action: ProductAction,
    pub(crate) resolutions: Vec<Resolution>,
}

/// Bulk ingestion over a [`CatalogStore`].
pub struct IngestionPipeline<S> {
    store: S,
    ctx: CatalogContext,
}

impl<S: CatalogStore> IngestionPipeline<S> {
    pub fn new(store: S, ctx: CatalogContext) -> Self {
        Self { store, ctx }
    }

    /// Ingest already-decoded rows.
    pub async fn run(&self, rows: Vec<ProductRow>, actor: UserId) -> Result<IngestionReport, CatalogError> {
        self.run_rows(rows.into_iter().map(Ok).collect(), actor).await
    }

    /// Decode a CSV upload and ingest it. Undecodable records become row-level errors.
    pub async fn run_csv<R: Read>(&self, reader: R, actor: UserId) -> Result<IngestionReport, CatalogError> {
        let rows = csv::parse_rows(reader, self.ctx.config.max_batch_rows)?;
        self.run_rows(rows, actor).await
    }

    /// Ingest rows where some may already have failed decoding.
    ///
    /// Only request-level problems (batch too large) return `Err`; row failures land in
    /// the report.
    #[instrument(skip_all, fields(rows = rows.len(), actor = %actor))]
    pub async fn run_rows(
        &self,
        rows: Vec<Result<ProductRow, CatalogError>>,
        actor: UserId,
    ) -> Result<IngestionReport, CatalogError> {
        let max = self.ctx.config.max_batch_rows;
        if rows.len() > max {
            return Err(CatalogError::validation(format!(
                "batch of {} rows exceeds the limit of {max}",
                rows.len()
            )));
        }

        let mut report = IngestionReport {
            total_rows: rows.len(),
            ..IngestionReport::default()
        };
        let mut resolver = EntityResolver::new();

        for (index, row) in rows.into_iter().enumerate() {
            let number = index + 1;
            let result = match row {
                Ok(row) => self.ingest_row(&mut resolver, &row, actor).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(success) => {
                    audit_row(&self.ctx, &success, actor);
                    report.record_success(number, success);
                }
                Err(e) => {
                    warn!(row = number, error_kind = %e.kind(), error = %e, "row skipped");
                    report.record_failure(number, &e);
                }
            }
        }

        if report.successful_products > 0 {
            let mut scopes: BTreeSet<CacheScope> = EntityKind::ALL
                .into_iter()
                .filter(|k| report.created(*k) > 0)
                .map(CacheScope::Entity)
                .collect();
            scopes.insert(CacheScope::Products);
            self.ctx.cache.invalidate(scopes).await;
        }

        info!(
            total = report.total_rows,
            successful = report.successful_products,
            skipped = report.skipped_rows,
            entities_created = report.total_created(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// One row, one transaction.
    pub(crate) async fn ingest_row(
        &self,
        resolver: &mut EntityResolver,
        row: &ProductRow,
        actor: UserId,
    ) -> Result<RowSuccess, CatalogError> {
        let mut tx = self.store.begin().await?;
        match write_row(&mut *tx, resolver, row, self.ctx.config.conflict_policy, actor).await {
            Ok(success) => match tx.commit().await {
                Ok(()) => {
                    resolver.commit_row();
                    Ok(success)
                }
                Err(e) => {
                    resolver.discard_row();
                    Err(e.into())
                }
            },
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                resolver.discard_row();
                Err(e)
            }
        }
    }
}

/// Audit entries for a committed row: one per created entity, one for the product.
pub(crate) fn audit_row(ctx: &CatalogContext, success: &RowSuccess, actor: UserId) {
    for r in success.resolutions.iter().filter(|r| r.was_created()) {
        ctx.audit.record(
            AuditEntry::new(AuditAction::Create, r.entity.kind.as_str(), r.entity.id, actor)
                .with_metadata(serde_json::json!({ "name": r.entity.name })),
        );
    }
    let action = match success.action {
        ProductAction::Created => AuditAction::Create,
        ProductAction::Updated => AuditAction::Update,
    };
    ctx.audit.record(
        AuditEntry::new(action, "product", success.product.id, actor).with_metadata(serde_json::json!({
            "name": success.product.name(),
            "sku": success.product.sku(),
        })),
    );
}

/// Resolve every level of `row` and persist its product inside `tx`.
pub(crate) async fn write_row(
    tx: &mut dyn CatalogTx,
    resolver: &mut EntityResolver,
    row: &ProductRow,
    policy: ConflictPolicy,
    actor: UserId,
) -> Result<RowSuccess, CatalogError> {
    row.validate()?;

    let manufacturer = resolver
        .resolve(tx, EntityKind::Manufacturer, None, &row.manufacturer, actor)
        .await?;
    let brand = resolver
        .resolve(tx, EntityKind::Brand, Some(&manufacturer.entity), &row.brand, actor)
        .await?;
    let variant = resolver
        .resolve(tx, EntityKind::Variant, Some(&brand.entity), &row.variant, actor)
        .await?;
    let pack_size = resolver
        .resolve(tx, EntityKind::PackSize, Some(&variant.entity), &row.pack_size, actor)
        .await?;
    let pack_type = resolver
        .resolve(tx, EntityKind::PackType, Some(&variant.entity), &row.pack_type, actor)
        .await?;
    let category = resolver
        .resolve(tx, EntityKind::Category, None, &row.category, actor)
        .await?;
    let subcategory = match &row.subcategory {
        Some(reference) => Some(
            resolver
                .resolve(tx, EntityKind::Subcategory, Some(&category.entity), reference, actor)
                .await?,
        ),
        None => None,
    };

    let path = DerivationPath::from_entities(&brand.entity, &variant.entity, &pack_size.entity, &pack_type.entity)?;
    let identity = DerivedIdentity::derive(&path)?;
    let links = ProductLinks {
        manufacturer_id: manufacturer.entity.id,
        brand_id: brand.entity.id,
        variant_id: variant.entity.id,
        pack_size_id: pack_size.entity.id,
        pack_type_id: pack_type.entity.id,
        category_id: category.entity.id,
        subcategory_id: subcategory.as_ref().map(|s| s.entity.id),
    };

    let now = Utc::now();
    let (product, action) = match tx.active_product_by_sku(&identity.sku).await? {
        Some(existing) if policy == ConflictPolicy::Reject => {
            return Err(CatalogError::conflict(format!(
                "product with SKU '{}' already exists ({})",
                existing.sku(),
                existing.id
            )));
        }
        Some(existing) if !existing.links.same_lineage(&links) => {
            return Err(CatalogError::conflict(format!(
                "SKU '{}' belongs to product {} under a different manufacturer or product line",
                existing.sku(),
                existing.id
            )));
        }
        Some(mut existing) => {
            existing.links.category_id = links.category_id;
            existing.links.subcategory_id = links.subcategory_id;
            existing.pricing = row.pricing.clone();
            if row.description.is_some() {
                existing.description = row.description.clone();
            }
            if row.thumbnail.is_some() {
                existing.thumbnail = row.thumbnail.clone();
            }
            if !row.images.is_empty() {
                existing.images = row.images.clone();
            }
            existing.stamp.touch(actor, now);
            tx.update_product(&existing).await.map_err(product_conflict)?;
            (existing, ProductAction::Updated)
        }
        None => {
            let mut product = Product::new(identity, links, row.pricing.clone(), actor, now);
            product.description = row.description.clone();
            product.thumbnail = row.thumbnail.clone();
            product.images = row.images.clone();
            tx.insert_product(&product).await.map_err(product_conflict)?;
            (product, ProductAction::Created)
        }
    };

    let mut resolutions = vec![manufacturer, brand, variant, pack_size, pack_type, category];
    resolutions.extend(subcategory);
    Ok(RowSuccess {
        product,
        action,
        resolutions,
    })
}

pub(crate) fn product_conflict(err: StoreError) -> CatalogError {
    match err {
        StoreError::UniqueViolation(constraint) => {
            CatalogError::conflict(format!("product name or SKU already taken ({constraint})"))
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::blob::InMemoryBlobStorage;
    use crate::cache::InMemoryCacheStore;
    use crate::config::CatalogConfig;
    use crate::store::InMemoryCatalogStore;
    use catalogerp_catalog::EntityRef;
    use std::sync::Arc;

    fn row(brand: &str, variant: &str, size: &str, pack: &str) -> ProductRow {
        ProductRow::new(
            EntityRef::name("Food"),
            EntityRef::name("Nestle"),
            EntityRef::name(brand),
            EntityRef::name(variant),
            EntityRef::name(size),
            EntityRef::name(pack),
        )
    }

    fn pipeline(config: CatalogConfig) -> (IngestionPipeline<Arc<InMemoryCatalogStore>>, Arc<InMemoryCatalogStore>, Arc<InMemoryAuditSink>) {
        let store = Arc::new(InMemoryCatalogStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let ctx = CatalogContext::new(
            config,
            audit.clone(),
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryBlobStorage::default()),
        );
        (IngestionPipeline::new(store.clone(), ctx), store, audit)
    }

    #[tokio::test]
    async fn batch_local_dedup_creates_one_brand() {
        let (pipeline, store, _) = pipeline(CatalogConfig::default());
        let report = pipeline
            .run(
                vec![row("Maggi", "Chicken", "70g", "Box"), row("maggi", "Beef", "70g", "Box")],
                UserId::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.successful_products, 2);
        assert_eq!(report.brands_created, 1);
        assert_eq!(report.manufacturers_created, 1);
        assert_eq!(report.variants_created, 2);
        assert_eq!(report.referenced(EntityKind::Brand), 1);
        assert_eq!(store.entities(EntityKind::Brand).await.len(), 1);

        let second = &report.rows[1];
        let brand = second.entities.iter().find(|e| e.kind == EntityKind::Brand).unwrap();
        assert_eq!(brand.action, ResolutionAction::Referenced);
        assert_eq!(brand.name, "Maggi");
    }

    #[tokio::test]
    async fn duplicate_sku_is_row_conflict_under_reject() {
        let (pipeline, store, _) = pipeline(CatalogConfig::default());
        let report = pipeline
            .run(
                vec![row("Maggi", "Chicken", "70g", "Box"), row("MAGGI", "chicken", "70G", "box")],
                UserId::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.successful_products, 1);
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(report.errors[0].kind, ErrorKind::Conflict);
        assert_eq!(store.products().await.len(), 1);
    }

    #[tokio::test]
    async fn update_existing_policy_refreshes_pricing() {
        let (pipeline, store, audit) =
            pipeline(CatalogConfig::default().with_conflict_policy(ConflictPolicy::UpdateExisting));
        let actor = UserId::new();
        pipeline.run(vec![row("Maggi", "Chicken", "70g", "Box")], actor).await.unwrap();

        let repriced = row("Maggi", "Chicken", "70g", "Box").with_pricing(
            catalogerp_catalog::Pricing::new(Decimal::from(150), Some(Decimal::from(5))).unwrap(),
        );
        let report = pipeline.run(vec![repriced], actor).await.unwrap();

        assert_eq!(report.products[0].action, ProductAction::Updated);
        assert_eq!(report.total_created(), 0);
        let products = store.products().await;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].pricing.price, Decimal::from(150));
        assert!(audit.entries().iter().any(|e| e.action == AuditAction::Update));
    }

    #[tokio::test]
    async fn update_existing_policy_never_crosses_manufacturers() {
        let (pipeline, store, _) =
            pipeline(CatalogConfig::default().with_conflict_policy(ConflictPolicy::UpdateExisting));
        let actor = UserId::new();
        pipeline.run(vec![row("Maggi", "Chicken", "70g", "Box")], actor).await.unwrap();
        let original = store.products().await;

        let unilever = ProductRow::new(
            EntityRef::name("Food"),
            EntityRef::name("Unilever"),
            EntityRef::name("Maggi"),
            EntityRef::name("Chicken"),
            EntityRef::name("70g"),
            EntityRef::name("Box"),
        )
        .with_pricing(catalogerp_catalog::Pricing::new(Decimal::from(999), None).unwrap());
        let report = pipeline.run(vec![unilever], actor).await.unwrap();

        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.errors[0].kind, ErrorKind::Conflict);
        assert!(report.products.is_empty());
        assert_eq!(report.total_created(), 0);
        assert_eq!(store.products().await, original);
        assert_eq!(store.entities(EntityKind::Manufacturer).await.len(), 1);
        assert_eq!(store.entities(EntityKind::Brand).await.len(), 1);
    }

    #[tokio::test]
    async fn update_existing_policy_moves_category_placement() {
        let (pipeline, store, _) =
            pipeline(CatalogConfig::default().with_conflict_policy(ConflictPolicy::UpdateExisting));
        let actor = UserId::new();
        pipeline.run(vec![row("Maggi", "Chicken", "70g", "Box")], actor).await.unwrap();

        let mut moved = row("Maggi", "Chicken", "70g", "Box").with_subcategory(EntityRef::name("Instant Meals"));
        moved.category = EntityRef::name("Pantry");
        let report = pipeline.run(vec![moved], actor).await.unwrap();

        assert_eq!(report.products[0].action, ProductAction::Updated);
        let pantry = store
            .entities(EntityKind::Category)
            .await
            .into_iter()
            .find(|c| c.name == "Pantry")
            .unwrap();
        let product = &store.products().await[0];
        assert_eq!(product.links.category_id, pantry.id);
        assert!(product.links.subcategory_id.is_some());
    }

    #[tokio::test]
    async fn failed_row_does_not_leak_entities() {
        let (pipeline, store, _) = pipeline(CatalogConfig::default());
        let bad = row("Milo", "Malt", "400g", "Tin").with_subcategory(EntityRef::Id(EntityId::new()));
        let report = pipeline
            .run(vec![bad, row("Milo", "Malt", "400g", "Tin")], UserId::new())
            .await
            .unwrap();

        assert_eq!(report.errors[0].kind, ErrorKind::NotFound);
        assert!(report.rows[0].entities.is_empty());
        // Row 2 recreates everything row 1 rolled back.
        assert_eq!(report.brands_created, 1);
        assert_eq!(store.entities(EntityKind::Brand).await.len(), 1);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_up_front() {
        let (pipeline, store, _) = pipeline(CatalogConfig::default().with_max_batch_rows(1));
        let err = pipeline
            .run(vec![row("A", "B", "C", "D"), row("E", "F", "G", "H")], UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert!(store.products().await.is_empty());
    }

    #[tokio::test]
    async fn commit_failure_is_transaction_error() {
        let (pipeline, store, audit) = pipeline(CatalogConfig::default());
        store.set_fail_commits(true);
        let report = pipeline.run(vec![row("A", "B", "C", "D")], UserId::new()).await.unwrap();
        assert_eq!(report.errors[0].kind, ErrorKind::Transaction);
        assert!(audit.entries().is_empty());
    }

    #[tokio::test]
    async fn csv_input_is_ingested() {
        let (pipeline, _, _) = pipeline(CatalogConfig::default());
        let data = "\
major_category,sub_category,manufacturer,brand,variant,pack_size,pack_type,price,discount
Food,Noodles,Nestle,Maggi,Chicken,70g,Single Pack,120,10
Food,Noodles,Nestle,Maggi,Chicken,70g,Single Pack,-1,
";
        let report = pipeline.run_csv(data.as_bytes(), UserId::new()).await.unwrap();
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.products[0].sku, "MAGGI-CHICKEN-70G-SINGLE-PACK");
        assert_eq!(report.products[0].discount, Some(Decimal::from(10)));
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(report.errors[0].kind, ErrorKind::Validation);
        assert_eq!(report.subcategories_created, 1);
    }
}
