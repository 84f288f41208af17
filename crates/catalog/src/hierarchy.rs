use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalogerp_core::{DomainError, Entity, EntityId, SoftDelete, UserId};

use crate::normalize::slugify;

/// Level of the catalog hierarchy.
///
/// ```text
/// Manufacturer → Brand → Variant → { PackSize, PackType }
/// Category → Subcategory
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Manufacturer,
    Brand,
    Variant,
    PackSize,
    PackType,
    Category,
    Subcategory,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Manufacturer,
        EntityKind::Brand,
        EntityKind::Variant,
        EntityKind::PackSize,
        EntityKind::PackType,
        EntityKind::Category,
        EntityKind::Subcategory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Manufacturer => "manufacturer",
            EntityKind::Brand => "brand",
            EntityKind::Variant => "variant",
            EntityKind::PackSize => "pack_size",
            EntityKind::PackType => "pack_type",
            EntityKind::Category => "category",
            EntityKind::Subcategory => "subcategory",
        }
    }

    /// Kind of the parent scope, `None` for roots.
    pub fn parent(self) -> Option<EntityKind> {
        match self {
            EntityKind::Manufacturer | EntityKind::Category => None,
            EntityKind::Brand => Some(EntityKind::Manufacturer),
            EntityKind::Variant => Some(EntityKind::Brand),
            EntityKind::PackSize | EntityKind::PackType => Some(EntityKind::Variant),
            EntityKind::Subcategory => Some(EntityKind::Category),
        }
    }

    /// Kinds whose names feed product name/SKU derivation.
    pub fn derives_product_identity(self) -> bool {
        matches!(
            self,
            EntityKind::Brand | EntityKind::Variant | EntityKind::PackSize | EntityKind::PackType
        )
    }

    pub fn has_slug(self) -> bool {
        matches!(self, EntityKind::Category | EntityKind::Subcategory)
    }

    /// Kinds whose parent is `self`.
    pub fn children(self) -> &'static [EntityKind] {
        match self {
            EntityKind::Manufacturer => &[EntityKind::Brand],
            EntityKind::Brand => &[EntityKind::Variant],
            EntityKind::Variant => &[EntityKind::PackSize, EntityKind::PackType],
            EntityKind::Category => &[EntityKind::Subcategory],
            EntityKind::PackSize | EntityKind::PackType | EntityKind::Subcategory => &[],
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown entity kind '{s}'")))
    }
}

/// Administrative status. Independent from soft deletion: an inactive entity still
/// exists and can be referenced, but blocks new children from being created under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Active,
    Inactive,
}

impl EntityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Inactive => "inactive",
        }
    }
}

/// Who touched a record and when, including soft deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl AuditStamp {
    pub fn new(actor: UserId, at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            created_by: actor,
            updated_at: at,
            updated_by: actor,
            deleted_at: None,
            deleted_by: None,
        }
    }

    pub fn touch(&mut self, actor: UserId, at: DateTime<Utc>) {
        self.updated_at = at;
        self.updated_by = actor;
    }

    pub fn mark_deleted(&mut self, actor: UserId, at: DateTime<Utc>) {
        self.touch(actor, at);
        self.deleted_at = Some(at);
        self.deleted_by = Some(actor);
    }
}

/// A node of the catalog hierarchy.
///
/// All seven levels share this shape; kind-specific attributes are optional:
/// `logo_url` is used by brands, `description` by variants, `slug` by categories and
/// subcategories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub parent_id: Option<EntityId>,
    pub name: String,
    pub status: EntityStatus,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub slug: Option<String>,
    pub stamp: AuditStamp,
}

impl HierarchyEntity {
    /// Build a new, active entity. `name` must already be in display form.
    pub fn new(
        kind: EntityKind,
        parent_id: Option<EntityId>,
        name: impl Into<String>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        let slug = kind.has_slug().then(|| slugify(&name));
        Self {
            id: EntityId::new(),
            kind,
            parent_id,
            name,
            status: EntityStatus::Active,
            description: None,
            logo_url: None,
            slug,
            stamp: AuditStamp::new(actor, at),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_logo_url(mut self, logo_url: Option<String>) -> Self {
        self.logo_url = logo_url;
        self
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    /// Apply a rename, keeping the slug in sync. `name` must be in display form.
    pub fn rename(&mut self, name: impl Into<String>, actor: UserId, at: DateTime<Utc>) {
        self.name = name.into();
        if self.kind.has_slug() {
            self.slug = Some(slugify(&self.name));
        }
        self.stamp.touch(actor, at);
    }

    pub fn accepts_children(&self) -> bool {
        self.status == EntityStatus::Active
    }
}

impl Entity for HierarchyEntity {
    type Id = EntityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDelete for HierarchyEntity {
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

    #[test]
    fn parents_form_two_trees() {
        assert_eq!(EntityKind::Manufacturer.parent(), None);
        assert_eq!(EntityKind::Category.parent(), None);
        assert_eq!(EntityKind::PackSize.parent(), Some(EntityKind::Variant));
        assert_eq!(EntityKind::PackType.parent(), Some(EntityKind::Variant));
        for kind in EntityKind::ALL {
            for child in kind.children() {
                assert_eq!(child.parent(), Some(kind));
            }
        }
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("widget".parse::<EntityKind>().is_err());
    }

    #[test]
    fn categories_get_slugs_and_rename_keeps_them_in_sync() {
        let actor = UserId::new();
        let mut cat = HierarchyEntity::new(EntityKind::Category, None, "Soft Drinks", actor, Utc::now());
        assert_eq!(cat.slug.as_deref(), Some("soft-drinks"));

        cat.rename("Hot Drinks", actor, Utc::now());
        assert_eq!(cat.slug.as_deref(), Some("hot-drinks"));

        let brand = HierarchyEntity::new(EntityKind::Brand, Some(EntityId::new()), "Maggi", actor, Utc::now());
        assert_eq!(brand.slug, None);
    }

    #[test]
    fn soft_delete_records_actor() {
        let actor = UserId::new();
        let mut m = HierarchyEntity::new(EntityKind::Manufacturer, None, "Nestle", actor, Utc::now());
        assert!(m.is_active());

        let deleter = UserId::new();
        m.stamp.mark_deleted(deleter, Utc::now());
        assert!(!m.is_active());
        assert_eq!(m.deleted_by(), Some(deleter));
        assert_eq!(m.stamp.updated_by, deleter);
    }
}
