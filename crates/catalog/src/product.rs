use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use catalogerp_core::{DomainError, DomainResult, Entity, EntityId, ProductId, SoftDelete, UserId};

use crate::codegen::DerivedIdentity;
use crate::hierarchy::{AuditStamp, EntityKind};

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }
}

/// Decimal places kept for money amounts.
pub const AMOUNT_SCALE: u32 = 2;

/// Price and optional discount, both in currency units.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub price: Decimal,
    pub discount: Option<Decimal>,
}

impl Pricing {
    pub fn new(price: Decimal, discount: Option<Decimal>) -> DomainResult<Self> {
        if price.is_sign_negative() {
            return Err(DomainError::validation("price cannot be negative"));
        }
        check_scale("price", price)?;
        if let Some(d) = discount {
            if d.is_sign_negative() {
                return Err(DomainError::validation("discount cannot be negative"));
            }
            check_scale("discount", d)?;
            if d > price {
                return Err(DomainError::validation(format!(
                    "discount {d} exceeds price {price}"
                )));
            }
        }
        Ok(Self { price, discount })
    }
}

fn check_scale(field: &str, amount: Decimal) -> DomainResult<()> {
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(DomainError::validation(format!(
            "{field} {amount} has more than {AMOUNT_SCALE} decimal places"
        )));
    }
    Ok(())
}

/// Resolved hierarchy references of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductLinks {
    pub manufacturer_id: EntityId,
    pub brand_id: EntityId,
    pub variant_id: EntityId,
    pub pack_size_id: EntityId,
    pub pack_type_id: EntityId,
    pub category_id: EntityId,
    pub subcategory_id: Option<EntityId>,
}

impl ProductLinks {
    /// The id this product references at `kind`, if any.
    pub fn get(&self, kind: EntityKind) -> Option<EntityId> {
        match kind {
            EntityKind::Manufacturer => Some(self.manufacturer_id),
            EntityKind::Brand => Some(self.brand_id),
            EntityKind::Variant => Some(self.variant_id),
            EntityKind::PackSize => Some(self.pack_size_id),
            EntityKind::PackType => Some(self.pack_type_id),
            EntityKind::Category => Some(self.category_id),
            EntityKind::Subcategory => self.subcategory_id,
        }
    }

    pub fn references(&self, kind: EntityKind, id: EntityId) -> bool {
        self.get(kind) == Some(id)
    }

    /// Same manufacturer, brand, variant, pack size and pack type.
    pub fn same_lineage(&self, other: &ProductLinks) -> bool {
        self.manufacturer_id == other.manufacturer_id
            && self.brand_id == other.brand_id
            && self.variant_id == other.variant_id
            && self.pack_size_id == other.pack_size_id
            && self.pack_type_id == other.pack_type_id
    }
}

/// A sellable catalog item.
///
/// `name` and `sku` are derived from the brand/variant/pack size/pack type names and are
/// only rewritten through [`Product::apply_identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    name: String,
    sku: String,
    pub links: ProductLinks,
    pub pricing: Pricing,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub images: Vec<String>,
    pub status: ProductStatus,
    pub stamp: AuditStamp,
}

impl Product {
    pub fn new(
        identity: DerivedIdentity,
        links: ProductLinks,
        pricing: Pricing,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProductId::new(),
            name: identity.name,
            sku: identity.sku,
            links,
            pricing,
            description: None,
            thumbnail: None,
            images: Vec::new(),
            status: ProductStatus::Active,
            stamp: AuditStamp::new(actor, at),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn identity(&self) -> DerivedIdentity {
        DerivedIdentity {
            name: self.name.clone(),
            sku: self.sku.clone(),
        }
    }

    /// Overwrite the derived name/SKU. Returns whether anything changed.
    pub fn apply_identity(&mut self, identity: DerivedIdentity, actor: UserId, at: DateTime<Utc>) -> bool {
        if self.name == identity.name && self.sku == identity.sku {
            return false;
        }
        self.name = identity.name;
        self.sku = identity.sku;
        self.stamp.touch(actor, at);
        true
    }

    /// Rehydrate from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: ProductId,
        name: String,
        sku: String,
        links: ProductLinks,
        pricing: Pricing,
        description: Option<String>,
        thumbnail: Option<String>,
        images: Vec<String>,
        status: ProductStatus,
        stamp: AuditStamp,
    ) -> Self {
        Self {
            id,
            name,
            sku,
            links,
            pricing,
            description,
            thumbnail,
            images,
            status,
            stamp,
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDelete for Product {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.stamp.deleted_at
    }

    fn deleted_by(&self) -> Option<UserId> {
        self.stamp.deleted_by
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn links() -> ProductLinks {
        ProductLinks {
            manufacturer_id: EntityId::new(),
            brand_id: EntityId::new(),
            variant_id: EntityId::new(),
            pack_size_id: EntityId::new(),
            pack_type_id: EntityId::new(),
            category_id: EntityId::new(),
            subcategory_id: None,
        }
    }

    #[test]
    fn pricing_rejects_discount_above_price() {
        let err = Pricing::new(d("10"), Some(d("12.5"))).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(Pricing::new(d("-1"), None).is_err());
        assert!(Pricing::new(d("10"), Some(d("10"))).is_ok());
    }

    #[test]
    fn pricing_rejects_sub_cent_amounts() {
        let err = Pricing::new(d("1.005"), None).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(Pricing::new(d("10"), Some(d("0.125"))).is_err());
        assert!(Pricing::new(d("1.50"), Some(d("0.1"))).is_ok());
        assert!(Pricing::new(d("2.5000"), None).is_ok());
    }

    #[test]
    fn lineage_ignores_category_placement() {
        let a = links();
        let mut b = a;
        b.category_id = EntityId::new();
        b.subcategory_id = Some(EntityId::new());
        assert!(a.same_lineage(&b));
        b.brand_id = EntityId::new();
        assert!(!a.same_lineage(&b));
    }

    #[test]
    fn links_resolve_by_kind() {
        let l = links();
        assert!(l.references(EntityKind::Brand, l.brand_id));
        assert!(!l.references(EntityKind::Variant, l.brand_id));
        assert_eq!(l.get(EntityKind::Subcategory), None);
    }

    #[test]
    fn apply_identity_reports_changes_only() {
        let actor = UserId::new();
        let identity = DerivedIdentity {
            name: "Maggi Chicken 70g (Single Pack)".to_string(),
            sku: "MAGGI-CHICKEN-70G-SINGLE-PACK".to_string(),
        };
        let mut p = Product::new(identity.clone(), links(), Pricing::default(), actor, Utc::now());

        assert!(!p.apply_identity(identity, actor, Utc::now()));

        let renamed = DerivedIdentity {
            name: "Maggi2000 Chicken 70g (Single Pack)".to_string(),
            sku: "MAGGI2000-CHICKEN-70G-SINGLE-PACK".to_string(),
        };
        let editor = UserId::new();
        assert!(p.apply_identity(renamed, editor, Utc::now()));
        assert_eq!(p.sku(), "MAGGI2000-CHICKEN-70G-SINGLE-PACK");
        assert_eq!(p.stamp.updated_by, editor);
    }
}
