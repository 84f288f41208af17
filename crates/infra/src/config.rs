//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What ingestion does when a row derives a SKU already owned by an active product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the row with a conflict.
    #[default]
    Reject,
    /// Update price, discount, description and images of the existing product.
    UpdateExisting,
}

impl core::str::FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ConflictPolicy::Reject),
            "update" | "update_existing" | "update-existing" => Ok(ConflictPolicy::UpdateExisting),
            other => Err(ConfigError::Invalid {
                key: "CATALOG_CONFLICT_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Catalog engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Postgres connection string; in-memory store when unset
    pub database_url: Option<String>,
    /// Redis connection string; in-memory cache when unset
    pub redis_url: Option<String>,
    /// Prefix of every cache key
    pub cache_namespace: String,
    pub conflict_policy: ConflictPolicy,
    /// Largest batch accepted by one ingestion run
    pub max_batch_rows: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            cache_namespace: "catalog".to_string(),
            conflict_policy: ConflictPolicy::Reject,
            max_batch_rows: 10_000,
        }
    }
}

impl CatalogConfig {
    /// Read configuration from the process environment.
    ///
    /// `DATABASE_URL`, `REDIS_URL`, `CATALOG_CACHE_NAMESPACE`, `CATALOG_CONFLICT_POLICY`
    /// (`reject` | `update`) and `CATALOG_MAX_BATCH_ROWS`. Unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        config.database_url = get("DATABASE_URL");
        config.redis_url = get("REDIS_URL");
        if let Some(ns) = get("CATALOG_CACHE_NAMESPACE") {
            config.cache_namespace = ns.trim().to_string();
        }
        if let Some(policy) = get("CATALOG_CONFLICT_POLICY") {
            config.conflict_policy = policy.parse()?;
        }
        if let Some(rows) = get("CATALOG_MAX_BATCH_ROWS") {
            config.max_batch_rows = rows
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    key: "CATALOG_MAX_BATCH_ROWS",
                    value: rows,
                })?;
        }
        Ok(config)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_cache_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.cache_namespace = namespace.into();
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_max_batch_rows(mut self, max: usize) -> Self {
        self.max_batch_rows = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = CatalogConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CatalogConfig::default());
        assert_eq!(config.cache_namespace, "catalog");
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
    }

    #[test]
    fn reads_overrides() {
        let config = CatalogConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/catalog"),
            ("REDIS_URL", "  "),
            ("CATALOG_CONFLICT_POLICY", "Update"),
            ("CATALOG_MAX_BATCH_ROWS", "500"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/catalog"));
        assert_eq!(config.redis_url, None);
        assert_eq!(config.conflict_policy, ConflictPolicy::UpdateExisting);
        assert_eq!(config.max_batch_rows, 500);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(CatalogConfig::from_lookup(lookup(&[("CATALOG_MAX_BATCH_ROWS", "0")])).is_err());
        assert!(CatalogConfig::from_lookup(lookup(&[("CATALOG_CONFLICT_POLICY", "merge")])).is_err());
    }
}
