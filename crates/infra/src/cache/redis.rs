//! Redis-backed cache (optional, `redis` feature).
//!
//! Prefix invalidation walks the keyspace with `SCAN MATCH` (never `KEYS`) and deletes
//! what it finds.

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{CacheError, CacheStore};

#[derive(Debug, Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

/// Escape glob metacharacters so the prefix matches literally.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

#[async_trait::async_trait]
impl CacheStore for RedisCacheStore {
    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;

        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn
                .scan_match::<_, String>(match_pattern(prefix))
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = conn
            .del(&keys)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_escapes_glob_characters() {
        assert_eq!(match_pattern("catalog:brand:"), "catalog:brand:*");
        assert_eq!(match_pattern("a*b?"), "a\\*b\\?*");
    }
}
