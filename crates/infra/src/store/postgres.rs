//! Postgres-backed catalog store.
//!
//! Schema lives in `migrations/0001_catalog.sql`. Both uniqueness rules are partial
//! unique indexes restricted to `deleted_at IS NULL`, so soft-deleted rows never block
//! new ones.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` (constraint name) |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use catalogerp_catalog::{
    AuditStamp, EntityKind, EntityStatus, HierarchyEntity, Pricing, Product, ProductLinks,
    ProductStatus, normalize,
};
use catalogerp_core::{EntityId, ProductId, UserId};

use super::r#trait::{CatalogStore, CatalogTx, StoreError};

const ENTITY_COLUMNS: &str = r#"
    id, kind, parent_id, name, status, description, logo_url, slug,
    created_at, created_by, updated_at, updated_by, deleted_at, deleted_by
"#;

const PRODUCT_COLUMNS: &str = r#"
    id, name, sku, manufacturer_id, brand_id, variant_id, pack_size_id, pack_type_id,
    category_id, subcategory_id, price, discount, description, thumbnail, images, status,
    created_at, created_by, updated_at, updated_by, deleted_at, deleted_by
"#;

/// Postgres-backed catalog store.
///
/// Uses the SQLx connection pool (thread-safe, `Send + Sync`). Every operation runs in
/// an explicit transaction at the database's default isolation (read committed).
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: Arc<PgPool>,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect using a database URL.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

const SCHEMA: &str = include_str!("../../migrations/0001_catalog.sql");

#[async_trait::async_trait]
impl CatalogStore for PostgresCatalogStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn CatalogTx + '_>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgCatalogTx { tx }))
    }
}

struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl CatalogTx for PgCatalogTx {
    #[instrument(skip(self), fields(entity_id = %id), err)]
    async fn entity(&mut self, id: EntityId) -> Result<Option<HierarchyEntity>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM catalog_entities WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_entity", e))?;

        row.map(|r| entity_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(kind = %kind), err)]
    async fn active_children(
        &mut self,
        kind: EntityKind,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<HierarchyEntity>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTITY_COLUMNS}
            FROM catalog_entities
            WHERE kind = $1
              AND parent_id IS NOT DISTINCT FROM $2
              AND deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(kind.as_str())
        .bind(parent_id.map(Uuid::from))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("active_children", e))?;

        rows.iter().map(entity_from_row).collect()
    }

    #[instrument(skip(self, entity), fields(kind = %entity.kind, entity_id = %entity.id), err)]
    async fn insert_entity(&mut self, entity: &HierarchyEntity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO catalog_entities (
                id, kind, parent_id, name, name_key, status, description, logo_url, slug,
                created_at, created_by, updated_at, updated_by, deleted_at, deleted_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(entity.id.as_uuid())
        .bind(entity.kind.as_str())
        .bind(entity.parent_id.map(Uuid::from))
        .bind(&entity.name)
        .bind(normalize(&entity.name))
        .bind(entity.status.as_str())
        .bind(&entity.description)
        .bind(&entity.logo_url)
        .bind(&entity.slug)
        .bind(entity.stamp.created_at)
        .bind(entity.stamp.created_by.as_uuid())
        .bind(entity.stamp.updated_at)
        .bind(entity.stamp.updated_by.as_uuid())
        .bind(entity.stamp.deleted_at)
        .bind(entity.stamp.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entity", e))?;
        Ok(())
    }

    #[instrument(skip(self, entity), fields(kind = %entity.kind, entity_id = %entity.id), err)]
    async fn update_entity(&mut self, entity: &HierarchyEntity) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE catalog_entities SET
                name = $2,
                name_key = $3,
                status = $4,
                description = $5,
                logo_url = $6,
                slug = $7,
                updated_at = $8,
                updated_by = $9,
                deleted_at = $10,
                deleted_by = $11
            WHERE id = $1
            "#,
        )
        .bind(entity.id.as_uuid())
        .bind(&entity.name)
        .bind(normalize(&entity.name))
        .bind(entity.status.as_str())
        .bind(&entity.description)
        .bind(&entity.logo_url)
        .bind(&entity.slug)
        .bind(entity.stamp.updated_at)
        .bind(entity.stamp.updated_by.as_uuid())
        .bind(entity.stamp.deleted_at)
        .bind(entity.stamp.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_entity", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{} {}", entity.kind, entity.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn active_product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1 AND deleted_at IS NULL"
        ))
        .bind(sku)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("active_product_by_sku", e))?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(kind = %kind, entity_id = %id), err)]
    async fn active_products_referencing(
        &mut self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Vec<Product>, StoreError> {
        // Column names come from a closed set, never from input.
        let column = link_column(kind);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE {column} = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            FOR UPDATE
            "#
        ))
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("active_products_referencing", e))?;

        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id, sku = %product.sku()), err)]
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, name_key, sku, manufacturer_id, brand_id, variant_id, pack_size_id,
                pack_type_id, category_id, subcategory_id, price, discount, description,
                thumbnail, images, status, created_at, created_by, updated_at, updated_by,
                deleted_at, deleted_by
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23
            )
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.name())
        .bind(normalize(product.name()))
        .bind(product.sku())
        .bind(product.links.manufacturer_id.as_uuid())
        .bind(product.links.brand_id.as_uuid())
        .bind(product.links.variant_id.as_uuid())
        .bind(product.links.pack_size_id.as_uuid())
        .bind(product.links.pack_type_id.as_uuid())
        .bind(product.links.category_id.as_uuid())
        .bind(product.links.subcategory_id.map(Uuid::from))
        .bind(product.pricing.price)
        .bind(product.pricing.discount)
        .bind(&product.description)
        .bind(&product.thumbnail)
        .bind(&product.images)
        .bind(product.status.as_str())
        .bind(product.stamp.created_at)
        .bind(product.stamp.created_by.as_uuid())
        .bind(product.stamp.updated_at)
        .bind(product.stamp.updated_by.as_uuid())
        .bind(product.stamp.deleted_at)
        .bind(product.stamp.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self, product), fields(product_id = %product.id, sku = %product.sku()), err)]
    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = $2,
                name_key = $3,
                sku = $4,
                manufacturer_id = $5,
                brand_id = $6,
                variant_id = $7,
                pack_size_id = $8,
                pack_type_id = $9,
                category_id = $10,
                subcategory_id = $11,
                price = $12,
                discount = $13,
                description = $14,
                thumbnail = $15,
                images = $16,
                status = $17,
                updated_at = $18,
                updated_by = $19,
                deleted_at = $20,
                deleted_by = $21
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.name())
        .bind(normalize(product.name()))
        .bind(product.sku())
        .bind(product.links.manufacturer_id.as_uuid())
        .bind(product.links.brand_id.as_uuid())
        .bind(product.links.variant_id.as_uuid())
        .bind(product.links.pack_size_id.as_uuid())
        .bind(product.links.pack_type_id.as_uuid())
        .bind(product.links.category_id.as_uuid())
        .bind(product.links.subcategory_id.map(Uuid::from))
        .bind(product.pricing.price)
        .bind(product.pricing.discount)
        .bind(&product.description)
        .bind(&product.thumbnail)
        .bind(&product.images)
        .bind(product.status.as_str())
        .bind(product.stamp.updated_at)
        .bind(product.stamp.updated_by.as_uuid())
        .bind(product.stamp.deleted_at)
        .bind(product.stamp.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {}", product.id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn link_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Manufacturer => "manufacturer_id",
        EntityKind::Brand => "brand_id",
        EntityKind::Variant => "variant_id",
        EntityKind::PackSize => "pack_size_id",
        EntityKind::PackType => "pack_type_id",
        EntityKind::Category => "category_id",
        EntityKind::Subcategory => "subcategory_id",
    }
}

fn decode<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("failed to decode column '{column}': {e}")))
}

fn stamp_from_row(row: &PgRow) -> Result<AuditStamp, StoreError> {
    Ok(AuditStamp {
        created_at: decode(row, "created_at")?,
        created_by: UserId::from_uuid(decode(row, "created_by")?),
        updated_at: decode(row, "updated_at")?,
        updated_by: UserId::from_uuid(decode(row, "updated_by")?),
        deleted_at: decode(row, "deleted_at")?,
        deleted_by: decode::<Option<Uuid>>(row, "deleted_by")?.map(UserId::from_uuid),
    })
}

fn entity_from_row(row: &PgRow) -> Result<HierarchyEntity, StoreError> {
    let kind: String = decode(row, "kind")?;
    let status: String = decode(row, "status")?;
    Ok(HierarchyEntity {
        id: EntityId::from_uuid(decode(row, "id")?),
        kind: kind
            .parse()
            .map_err(|e| StoreError::Backend(format!("bad kind column: {e}")))?,
        parent_id: decode::<Option<Uuid>>(row, "parent_id")?.map(EntityId::from_uuid),
        name: decode(row, "name")?,
        status: match status.as_str() {
            "inactive" => EntityStatus::Inactive,
            _ => EntityStatus::Active,
        },
        description: decode(row, "description")?,
        logo_url: decode(row, "logo_url")?,
        slug: decode(row, "slug")?,
        stamp: stamp_from_row(row)?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let status: String = decode(row, "status")?;
    let links = ProductLinks {
        manufacturer_id: EntityId::from_uuid(decode(row, "manufacturer_id")?),
        brand_id: EntityId::from_uuid(decode(row, "brand_id")?),
        variant_id: EntityId::from_uuid(decode(row, "variant_id")?),
        pack_size_id: EntityId::from_uuid(decode(row, "pack_size_id")?),
        pack_type_id: EntityId::from_uuid(decode(row, "pack_type_id")?),
        category_id: EntityId::from_uuid(decode(row, "category_id")?),
        subcategory_id: decode::<Option<Uuid>>(row, "subcategory_id")?.map(EntityId::from_uuid),
    };
    Ok(Product::from_parts(
        ProductId::from_uuid(decode(row, "id")?),
        decode(row, "name")?,
        decode(row, "sku")?,
        links,
        Pricing {
            price: decode(row, "price")?,
            discount: decode(row, "discount")?,
        },
        decode(row, "description")?,
        decode(row, "thumbnail")?,
        decode(row, "images")?,
        match status.as_str() {
            "inactive" => ProductStatus::Inactive,
            _ => ProductStatus::Active,
        },
        stamp_from_row(row)?,
    ))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(
                    db_err
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or(msg),
                ),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
