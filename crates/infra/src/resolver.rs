//! Find-or-create resolution of hierarchy entities.
//!
//! A raw name resolves against, in order:
//!
//! 1. active siblings under the same parent (normalized name equality)
//! 2. the batch-local cache of entities created earlier in the same ingestion call,
//!    re-read from the store and dropped unless still live under the same name and parent
//! 3. a new entity, created with the sanitized display name
//!
//! The batch cache is transaction-aware: entities created inside a row that later rolls
//! back are discarded with [`EntityResolver::discard_row`].

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use catalogerp_catalog::row::MAX_NAME_LEN;
use catalogerp_catalog::{CanonicalName, EntityKind, EntityRef, HierarchyEntity};
use catalogerp_core::{EntityId, SoftDelete, UserId};

use crate::error::CatalogError;
use crate::store::{CatalogTx, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Created,
    Referenced,
}

/// Outcome of resolving one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entity: HierarchyEntity,
    pub action: ResolutionAction,
}

impl Resolution {
    fn created(entity: HierarchyEntity) -> Self {
        Self {
            entity,
            action: ResolutionAction::Created,
        }
    }

    fn referenced(entity: HierarchyEntity) -> Self {
        Self {
            entity,
            action: ResolutionAction::Referenced,
        }
    }

    pub fn was_created(&self) -> bool {
        self.action == ResolutionAction::Created
    }
}

type ScopeKey = (EntityKind, Option<EntityId>, String);

/// Entities created during one ingestion call, keyed by `(kind, parent, normalized name)`.
#[derive(Debug, Default)]
pub struct BatchCache {
    committed: HashMap<ScopeKey, HierarchyEntity>,
    pending: HashMap<ScopeKey, HierarchyEntity>,
}

impl BatchCache {
    fn get(&self, key: &ScopeKey) -> Option<&HierarchyEntity> {
        self.pending.get(key).or_else(|| self.committed.get(key))
    }

    fn stage(&mut self, key: ScopeKey, entity: HierarchyEntity) {
        self.pending.insert(key, entity);
    }

    fn evict(&mut self, key: &ScopeKey) {
        self.pending.remove(key);
        self.committed.remove(key);
    }

    pub fn len(&self) -> usize {
        self.committed.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves entity references level by level within a caller-owned transaction.
#[derive(Debug, Default)]
pub struct EntityResolver {
    cache: BatchCache,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &BatchCache {
        &self.cache
    }

    /// The current row committed: keep what it created.
    pub fn commit_row(&mut self) {
        let pending = std::mem::take(&mut self.cache.pending);
        self.cache.committed.extend(pending);
    }

    /// The current row rolled back: forget what it created.
    pub fn discard_row(&mut self) {
        self.cache.pending.clear();
    }

    /// Resolve `reference` at `kind` under `parent`.
    ///
    /// `parent` must be `None` for root kinds and an entity of `kind.parent()` otherwise.
    pub async fn resolve(
        &mut self,
        tx: &mut dyn CatalogTx,
        kind: EntityKind,
        parent: Option<&HierarchyEntity>,
        reference: &EntityRef,
        actor: UserId,
    ) -> Result<Resolution, CatalogError> {
        let scope = check_parent(kind, parent)?;
        match reference {
            EntityRef::Id(id) => resolve_id(tx, kind, scope, *id).await,
            EntityRef::Name(raw) => self.resolve_name(tx, kind, parent, scope, raw, actor).await,
        }
    }

    async fn resolve_name(
        &mut self,
        tx: &mut dyn CatalogTx,
        kind: EntityKind,
        parent: Option<&HierarchyEntity>,
        scope: Option<EntityId>,
        raw: &str,
        actor: UserId,
    ) -> Result<Resolution, CatalogError> {
        let name = CanonicalName::new(raw);
        if name.is_empty() {
            return Err(CatalogError::validation(format!("{kind} name is empty")));
        }
        if name.display().chars().count() > MAX_NAME_LEN {
            return Err(CatalogError::validation(format!(
                "{kind} name is too long (max {MAX_NAME_LEN} chars)"
            )));
        }

        let siblings = tx.active_children(kind, scope).await?;
        if let Some(existing) = siblings.into_iter().find(|s| name.matches(&s.name)) {
            debug!(kind = %kind, entity_id = %existing.id, "resolved to existing sibling");
            return Ok(Resolution::referenced(existing));
        }

        let key = (kind, scope, name.key().to_string());
        if let Some(cached_id) = self.cache.get(&key).map(|c| c.id) {
            let current = tx
                .entity(cached_id)
                .await?
                .filter(|e| e.is_active() && e.parent_id == scope && name.matches(&e.name));
            match current {
                Some(entity) => {
                    debug!(kind = %kind, entity_id = %entity.id, "resolved from batch cache");
                    return Ok(Resolution::referenced(entity));
                }
                None => {
                    debug!(kind = %kind, entity_id = %cached_id, "evicted stale batch cache entry");
                    self.cache.evict(&key);
                }
            }
        }

        if let Some(p) = parent {
            if !p.accepts_children() {
                return Err(CatalogError::InactiveParent(format!(
                    "{} '{}' is inactive; cannot create {kind} '{}' under it",
                    p.kind,
                    p.name,
                    name.display()
                )));
            }
        }

        let entity = HierarchyEntity::new(kind, scope, name.into_display(), actor, Utc::now());
        tx.insert_entity(&entity).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => CatalogError::conflict(format!(
                "{kind} '{}' already exists in this scope",
                entity.name
            )),
            other => other.into(),
        })?;
        debug!(kind = %kind, entity_id = %entity.id, name = %entity.name, "created entity");

        self.cache.stage(key, entity.clone());
        Ok(Resolution::created(entity))
    }
}

/// Load a live entity of `kind` by id.
pub(crate) async fn load_active(
    tx: &mut dyn CatalogTx,
    kind: EntityKind,
    id: EntityId,
) -> Result<HierarchyEntity, CatalogError> {
    let entity = tx
        .entity(id)
        .await?
        .filter(|e| e.is_active())
        .ok_or_else(|| CatalogError::not_found(format!("{kind} {id}")))?;
    if entity.kind != kind {
        return Err(CatalogError::validation(format!(
            "{id} is a {}, expected a {kind}",
            entity.kind
        )));
    }
    Ok(entity)
}

async fn resolve_id(
    tx: &mut dyn CatalogTx,
    kind: EntityKind,
    scope: Option<EntityId>,
    id: EntityId,
) -> Result<Resolution, CatalogError> {
    let entity = load_active(tx, kind, id).await?;
    if entity.parent_id != scope {
        return Err(CatalogError::validation(format!(
            "{kind} '{}' does not belong to the given parent",
            entity.name
        )));
    }
    Ok(Resolution::referenced(entity))
}

fn check_parent(
    kind: EntityKind,
    parent: Option<&HierarchyEntity>,
) -> Result<Option<EntityId>, CatalogError> {
    match (kind.parent(), parent) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(CatalogError::validation(format!(
            "{kind} is a root level and takes no parent"
        ))),
        (Some(expected), None) => Err(CatalogError::validation(format!(
            "{kind} requires a {expected} parent"
        ))),
        (Some(expected), Some(p)) if p.kind != expected => Err(CatalogError::validation(format!(
            "{kind} parent must be a {expected}, got a {}",
            p.kind
        ))),
        (Some(_), Some(p)) if !p.is_active() => Err(CatalogError::not_found(format!(
            "{} {} is deleted",
            p.kind, p.id
        ))),
        (Some(_), Some(p)) => Ok(Some(p.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CatalogStore, InMemoryCatalogStore};
    use catalogerp_catalog::EntityStatus;

    fn manufacturer(name: &str) -> HierarchyEntity {
        HierarchyEntity::new(EntityKind::Manufacturer, None, name, UserId::new(), Utc::now())
    }

    #[tokio::test]
    async fn sibling_match_is_case_and_space_insensitive() {
        let store = InMemoryCatalogStore::new();
        let nestle = manufacturer("Nestle");
        store.seed_entity(nestle.clone()).await;
        let actor = UserId::new();
        let mut resolver = EntityResolver::new();

        let mut tx = store.begin().await.unwrap();
        let first = resolver
            .resolve(&mut *tx, EntityKind::Brand, Some(&nestle), &EntityRef::name("Coca Cola"), actor)
            .await
            .unwrap();
        assert!(first.was_created());
        let second = resolver
            .resolve(&mut *tx, EntityKind::Brand, Some(&nestle), &EntityRef::name("coca cola "), actor)
            .await
            .unwrap();
        assert_eq!(second.action, ResolutionAction::Referenced);
        assert_eq!(second.entity.id, first.entity.id);
        assert_eq!(first.entity.name, "Coca Cola");
    }

    #[tokio::test]
    async fn discarded_rows_drop_cached_entities() {
        let store = InMemoryCatalogStore::new();
        let actor = UserId::new();
        let mut resolver = EntityResolver::new();

        let mut tx = store.begin().await.unwrap();
        resolver
            .resolve(&mut *tx, EntityKind::Manufacturer, None, &EntityRef::name("Nestle"), actor)
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        resolver.discard_row();
        assert!(resolver.cache().is_empty());

        let mut tx = store.begin().await.unwrap();
        let again = resolver
            .resolve(&mut *tx, EntityKind::Manufacturer, None, &EntityRef::name("NESTLE"), actor)
            .await
            .unwrap();
        assert!(again.was_created());
        tx.commit().await.unwrap();
        resolver.commit_row();
        assert_eq!(resolver.cache().len(), 1);
    }

    #[tokio::test]
    async fn cached_entity_deleted_between_rows_is_not_reused() {
        let store = InMemoryCatalogStore::new();
        let actor = UserId::new();
        let mut resolver = EntityResolver::new();

        let mut tx = store.begin().await.unwrap();
        let first = resolver
            .resolve(&mut *tx, EntityKind::Manufacturer, None, &EntityRef::name("Nestle"), actor)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        resolver.commit_row();

        // Soft-deleted by another request before the next row.
        let mut tx = store.begin().await.unwrap();
        let mut deleted = first.entity.clone();
        deleted.stamp.mark_deleted(actor, Utc::now());
        tx.update_entity(&deleted).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let again = resolver
            .resolve(&mut *tx, EntityKind::Manufacturer, None, &EntityRef::name("nestle"), actor)
            .await
            .unwrap();
        assert!(again.was_created());
        assert_ne!(again.entity.id, first.entity.id);
        assert!(again.entity.is_active());
        tx.commit().await.unwrap();
        resolver.commit_row();
        assert_eq!(resolver.cache().len(), 1);
    }

    #[tokio::test]
    async fn cached_entity_renamed_between_rows_is_not_reused() {
        let store = InMemoryCatalogStore::new();
        let actor = UserId::new();
        let mut resolver = EntityResolver::new();

        let mut tx = store.begin().await.unwrap();
        let first = resolver
            .resolve(&mut *tx, EntityKind::Manufacturer, None, &EntityRef::name("Nestle"), actor)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        resolver.commit_row();

        // Renamed by another request to a name that no longer matches the sibling lookup.
        let mut tx = store.begin().await.unwrap();
        let mut renamed = first.entity.clone();
        renamed.rename("Nestle SA", actor, Utc::now());
        tx.update_entity(&renamed).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let again = resolver
            .resolve(&mut *tx, EntityKind::Manufacturer, None, &EntityRef::name("Nestle"), actor)
            .await
            .unwrap();
        assert!(again.was_created());
        assert_ne!(again.entity.id, first.entity.id);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn inactive_parent_blocks_creation_but_not_reuse() {
        let store = InMemoryCatalogStore::new();
        let actor = UserId::new();
        let nestle = manufacturer("Nestle").with_status(EntityStatus::Inactive);
        let maggi = HierarchyEntity::new(EntityKind::Brand, Some(nestle.id), "Maggi", actor, Utc::now());
        store.seed_entity(nestle.clone()).await;
        store.seed_entity(maggi.clone()).await;
        let mut resolver = EntityResolver::new();

        let mut tx = store.begin().await.unwrap();
        let reused = resolver
            .resolve(&mut *tx, EntityKind::Brand, Some(&nestle), &EntityRef::name("maggi"), actor)
            .await
            .unwrap();
        assert_eq!(reused.entity.id, maggi.id);

        let err = resolver
            .resolve(&mut *tx, EntityKind::Brand, Some(&nestle), &EntityRef::name("Milo"), actor)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InactiveParent(_)));
    }

    #[tokio::test]
    async fn id_references_must_be_live_and_in_scope() {
        let store = InMemoryCatalogStore::new();
        let actor = UserId::new();
        let nestle = manufacturer("Nestle");
        let unilever = manufacturer("Unilever");
        let knorr = HierarchyEntity::new(EntityKind::Brand, Some(unilever.id), "Knorr", actor, Utc::now());
        let mut gone = HierarchyEntity::new(EntityKind::Brand, Some(nestle.id), "Old", actor, Utc::now());
        gone.stamp.mark_deleted(actor, Utc::now());
        for e in [&nestle, &unilever, &knorr, &gone] {
            store.seed_entity(e.clone()).await;
        }
        let mut resolver = EntityResolver::new();
        let mut tx = store.begin().await.unwrap();

        let ok = resolver
            .resolve(&mut *tx, EntityKind::Brand, Some(&unilever), &EntityRef::Id(knorr.id), actor)
            .await
            .unwrap();
        assert_eq!(ok.action, ResolutionAction::Referenced);

        let wrong_scope = resolver
            .resolve(&mut *tx, EntityKind::Brand, Some(&nestle), &EntityRef::Id(knorr.id), actor)
            .await
            .unwrap_err();
        assert!(matches!(wrong_scope, CatalogError::Validation(_)));

        let deleted = resolver
            .resolve(&mut *tx, EntityKind::Brand, Some(&nestle), &EntityRef::Id(gone.id), actor)
            .await
            .unwrap_err();
        assert!(matches!(deleted, CatalogError::NotFound(_)));

        let missing = resolver
            .resolve(&mut *tx, EntityKind::Category, None, &EntityRef::Id(EntityId::new()), actor)
            .await
            .unwrap_err();
        assert!(matches!(missing, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn parent_level_is_checked() {
        let store = InMemoryCatalogStore::new();
        let actor = UserId::new();
        let nestle = manufacturer("Nestle");
        let mut resolver = EntityResolver::new();
        let mut tx = store.begin().await.unwrap();

        let err = resolver
            .resolve(&mut *tx, EntityKind::Variant, Some(&nestle), &EntityRef::name("Chicken"), actor)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let err = resolver
            .resolve(&mut *tx, EntityKind::Brand, None, &EntityRef::name("Maggi"), actor)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }
}
