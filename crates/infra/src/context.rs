use std::sync::Arc;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::blob::{BlobStorage, InMemoryBlobStorage};
use crate::cache::{CacheInvalidator, CacheStore, InMemoryCacheStore};
use crate::config::CatalogConfig;

/// Collaborators shared by the pipeline, the cascade updater and the service.
///
/// Passed explicitly into every component; nothing is process-global.
#[derive(Clone)]
pub struct CatalogContext {
    pub config: Arc<CatalogConfig>,
    pub audit: Arc<dyn AuditSink>,
    pub cache: CacheInvalidator,
    pub blob: Arc<dyn BlobStorage>,
}

impl CatalogContext {
    pub fn new(
        config: CatalogConfig,
        audit: Arc<dyn AuditSink>,
        cache: Arc<dyn CacheStore>,
        blob: Arc<dyn BlobStorage>,
    ) -> Self {
        let cache = CacheInvalidator::new(cache, config.cache_namespace.clone());
        Self {
            config: Arc::new(config),
            audit,
            cache,
            blob,
        }
    }

    /// In-memory cache and blob storage, audit entries to the tracing log.
    pub fn in_memory(config: CatalogConfig) -> Self {
        Self::new(
            config,
            Arc::new(TracingAuditSink),
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryBlobStorage::default()),
        )
    }
}

impl core::fmt::Debug for CatalogContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CatalogContext")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
