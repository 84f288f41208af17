//! Read-cache invalidation.
//!
//! Cached reads live under `"{namespace}:{scope}:"` key prefixes. After a commit the
//! engine drops the prefixes it touched. Cache failures are logged and swallowed: the
//! database stays authoritative and a stale read is the worst outcome.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use catalogerp_catalog::EntityKind;

pub use in_memory::InMemoryCacheStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCacheStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key/value cache that supports bulk removal by prefix.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Remove every key starting with `prefix`, returning how many were dropped.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// A family of cached reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheScope {
    Entity(EntityKind),
    Products,
}

impl CacheScope {
    fn segment(self) -> &'static str {
        match self {
            CacheScope::Entity(kind) => kind.as_str(),
            CacheScope::Products => "product",
        }
    }
}

/// Best-effort, post-commit cache invalidation.
#[derive(Clone)]
pub struct CacheInvalidator {
    store: Arc<dyn CacheStore>,
    namespace: String,
}

impl core::fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl CacheInvalidator {
    pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn prefix(&self, scope: CacheScope) -> String {
        format!("{}:{}:", self.namespace, scope.segment())
    }

    /// Drop every listed scope once. Never fails.
    pub async fn invalidate(&self, scopes: impl IntoIterator<Item = CacheScope>) {
        let unique: BTreeSet<CacheScope> = scopes.into_iter().collect();
        for scope in unique {
            let prefix = self.prefix(scope);
            match self.store.invalidate_prefix(&prefix).await {
                Ok(removed) => debug!(prefix = %prefix, removed, "cache invalidated"),
                Err(e) => warn!(prefix = %prefix, error = %e, "cache invalidation failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalidates_only_touched_scopes() {
        let cache = Arc::new(InMemoryCacheStore::new());
        cache.put("catalog:brand:list", b"[]".to_vec());
        cache.put("catalog:product:42", b"{}".to_vec());
        cache.put("catalog:category:all", b"[]".to_vec());

        let invalidator = CacheInvalidator::new(cache.clone(), "catalog");
        invalidator
            .invalidate([
                CacheScope::Entity(EntityKind::Brand),
                CacheScope::Products,
                CacheScope::Products,
            ])
            .await;

        assert!(cache.get("catalog:brand:list").is_none());
        assert!(cache.get("catalog:product:42").is_none());
        assert!(cache.get("catalog:category:all").is_some());
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let cache = Arc::new(InMemoryCacheStore::new());
        cache.put("catalog:product:1", vec![1]);
        cache.set_unavailable(true);

        let invalidator = CacheInvalidator::new(cache.clone(), "catalog");
        invalidator.invalidate([CacheScope::Products]).await;

        cache.set_unavailable(false);
        assert!(cache.get("catalog:product:1").is_some());
    }

    #[test]
    fn pack_size_prefix_uses_snake_case() {
        let invalidator = CacheInvalidator::new(Arc::new(InMemoryCacheStore::new()), "erp");
        assert_eq!(
            invalidator.prefix(CacheScope::Entity(EntityKind::PackSize)),
            "erp:pack_size:"
        );
    }
}
