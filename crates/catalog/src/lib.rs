//! Catalog domain module.
//!
//! Business rules for the product catalog hierarchy, implemented purely as
//! deterministic domain logic (no IO, no storage): name canonicalization, product
//! name/SKU derivation, the hierarchy/product model and ingestion row validation.

pub mod codegen;
pub mod hierarchy;
pub mod normalize;
pub mod product;
pub mod row;

pub use codegen::{DerivationPath, DerivedIdentity, product_name, product_sku};
pub use hierarchy::{AuditStamp, EntityKind, EntityStatus, HierarchyEntity};
pub use normalize::{CanonicalName, code_token, normalize, sanitize_display, slugify};
pub use product::{Pricing, Product, ProductLinks, ProductStatus};
pub use row::{CsvRow, EntityRef, ProductRow};
