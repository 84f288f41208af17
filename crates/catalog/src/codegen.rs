//! Product name and SKU derivation.
//!
//! A product's name and SKU are pure functions of its brand, variant, pack size and
//! pack type names. Uniqueness is not checked here; persistence owns that.

use serde::{Deserialize, Serialize};

use catalogerp_core::{DomainError, DomainResult, ValueObject};

use crate::hierarchy::{EntityKind, HierarchyEntity};
use crate::normalize::{code_token, sanitize_display};

/// The four names a product identity is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationPath<'a> {
    pub brand: &'a str,
    pub variant: &'a str,
    pub pack_size: &'a str,
    pub pack_type: &'a str,
}

impl<'a> DerivationPath<'a> {
    pub fn new(brand: &'a str, variant: &'a str, pack_size: &'a str, pack_type: &'a str) -> Self {
        Self {
            brand,
            variant,
            pack_size,
            pack_type,
        }
    }

    /// Build from resolved entities, checking each sits at the expected level.
    pub fn from_entities(
        brand: &'a HierarchyEntity,
        variant: &'a HierarchyEntity,
        pack_size: &'a HierarchyEntity,
        pack_type: &'a HierarchyEntity,
    ) -> DomainResult<Self> {
        for (entity, expected) in [
            (brand, EntityKind::Brand),
            (variant, EntityKind::Variant),
            (pack_size, EntityKind::PackSize),
            (pack_type, EntityKind::PackType),
        ] {
            if entity.kind != expected {
                return Err(DomainError::validation(format!(
                    "expected a {expected}, got {} '{}'",
                    entity.kind, entity.name
                )));
            }
        }
        Ok(Self::new(&brand.name, &variant.name, &pack_size.name, &pack_type.name))
    }
}

/// `"{brand} {variant} {packSize} ({packType})"` over display names.
pub fn product_name(path: &DerivationPath<'_>) -> String {
    format!(
        "{} {} {} ({})",
        sanitize_display(path.brand),
        sanitize_display(path.variant),
        sanitize_display(path.pack_size),
        sanitize_display(path.pack_type),
    )
}

/// `BRAND-VARIANT-PACKSIZE-PACKTYPE` over code tokens.
pub fn product_sku(path: &DerivationPath<'_>) -> String {
    [path.brand, path.variant, path.pack_size, path.pack_type]
        .iter()
        .map(|name| code_token(name))
        .collect::<Vec<_>>()
        .join("-")
}

/// Derived name + SKU pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedIdentity {
    pub name: String,
    pub sku: String,
}

impl ValueObject for DerivedIdentity {}

impl DerivedIdentity {
    /// Derive name and SKU, rejecting paths where a level has no SKU-usable characters.
    pub fn derive(path: &DerivationPath<'_>) -> DomainResult<Self> {
        for (label, name) in [
            ("brand", path.brand),
            ("variant", path.variant),
            ("pack size", path.pack_size),
            ("pack type", path.pack_type),
        ] {
            if code_token(name).is_empty() {
                return Err(DomainError::validation(format!(
                    "{label} '{name}' has no letters or digits to build a SKU from"
                )));
            }
        }
        Ok(Self {
            name: product_name(path),
            sku: product_sku(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalogerp_core::{EntityId, UserId};
    use chrono::Utc;

    #[test]
    fn derives_reference_identity() {
        let path = DerivationPath::new("Indomie", "Chicken", "70g", "Single Pack");
        assert_eq!(product_name(&path), "Indomie Chicken 70g (Single Pack)");
        assert_eq!(product_sku(&path), "INDOMIE-CHICKEN-70G-SINGLE-PACK");
    }

    #[test]
    fn derivation_sanitizes_raw_input() {
        let path = DerivationPath::new(" indomie ", "CHICKEN", "70G", "single   pack");
        let id = DerivedIdentity::derive(&path).unwrap();
        assert_eq!(id.name, "Indomie Chicken 70g (Single Pack)");
        assert_eq!(id.sku, "INDOMIE-CHICKEN-70G-SINGLE-PACK");
    }

    #[test]
    fn derive_rejects_symbol_only_level() {
        let path = DerivationPath::new("Indomie", "***", "70g", "Single Pack");
        let err = DerivedIdentity::derive(&path).unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("variant")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn from_entities_checks_levels() {
        let actor = UserId::new();
        let now = Utc::now();
        let parent = Some(EntityId::new());
        let brand = HierarchyEntity::new(EntityKind::Brand, parent, "Maggi", actor, now);
        let variant = HierarchyEntity::new(EntityKind::Variant, parent, "Chicken", actor, now);
        let size = HierarchyEntity::new(EntityKind::PackSize, parent, "70g", actor, now);
        let pack = HierarchyEntity::new(EntityKind::PackType, parent, "Carton", actor, now);

        let path = DerivationPath::from_entities(&brand, &variant, &size, &pack).unwrap();
        assert_eq!(product_sku(&path), "MAGGI-CHICKEN-70G-CARTON");

        assert!(DerivationPath::from_entities(&variant, &brand, &size, &pack).is_err());
    }

    mod proptest_tests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                .. ProptestConfig::default()
            })]

            #[test]
            fn derivation_is_deterministic(
                b in "[A-Za-z0-9 ]{1,12}",
                v in "[A-Za-z0-9 ]{1,12}",
                s in "[A-Za-z0-9 ]{1,12}",
                t in "[A-Za-z0-9 ]{1,12}",
            ) {
                let path = DerivationPath::new(&b, &v, &s, &t);
                prop_assert_eq!(product_name(&path), product_name(&path));
                prop_assert_eq!(product_sku(&path), product_sku(&path));
            }

            #[test]
            fn case_and_spacing_do_not_change_identity(
                b in "[a-z0-9]{1,8}( [a-z0-9]{1,8})?",
                v in "[a-z0-9]{1,8}",
            ) {
                let lower = DerivationPath::new(&b, &v, "1kg", "box");
                let upper_b = format!("  {}  ", b.to_uppercase());
                let shouty = DerivationPath::new(&upper_b, &v, "1KG", "BOX");
                prop_assert_eq!(product_name(&lower), product_name(&shouty));
                prop_assert_eq!(product_sku(&lower), product_sku(&shouty));
            }
        }
    }
}
