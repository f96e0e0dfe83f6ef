/// Redis caching layer for guideline retrieval.
///
/// All operations return `Option<T>` for graceful degradation. If Redis is unavailable,
/// callers fall through to the embedding index.
///
/// Key schema:
/// - `wcag:v1:context:{sha256(description|k)}`: joined passages for a violation description (TTL: 3600s)
/// - `wcag:v1:search:{sha256(query|limit)}`: JSON-serialized Vec<GuidelineHit> (TTL: 3600s)
///
/// Both are invalidated whenever population inserts new entries.
use sha2::{Digest, Sha256};
use tracing::warn;

use a11y_common::redis::RedisCache;

use crate::index::GuidelineHit;

const KEY_PREFIX: &str = "wcag:v1:";
const TTL_SECS: u64 = 3600;

pub struct ContextCache {
    redis: RedisCache,
}

impl ContextCache {
    pub fn new(redis: RedisCache) -> Self {
        Self { redis }
    }

    pub fn disabled() -> Self {
        Self::new(RedisCache::disabled())
    }

    // --- Retrieval context ---

    pub async fn get_context(&self, description: &str, k: usize) -> Option<String> {
        self.redis.get(&hashed_key("context", description, k)).await
    }

    pub async fn set_context(&self, description: &str, k: usize, context: &str) {
        self.redis
            .set_with_ttl(&hashed_key("context", description, k), context, TTL_SECS)
            .await;
    }

    // --- Search results ---

    pub async fn get_search_results(&self, query: &str, limit: usize) -> Option<Vec<GuidelineHit>> {
        let key = hashed_key("search", query, limit);
        let json = self.redis.get(&key).await?;
        serde_json::from_str(&json)
            .inspect_err(|e| warn!(error = %e, key, "cache deserialization failed"))
            .ok()
    }

    pub async fn set_search_results(&self, query: &str, limit: usize, hits: &[GuidelineHit]) {
        let key = hashed_key("search", query, limit);
        if let Ok(json) = serde_json::to_string(hits) {
            self.redis.set_with_ttl(&key, &json, TTL_SECS).await;
        }
    }

    /// Delete every cached entry. Uses SCAN-based prefix deletion.
    pub async fn invalidate_all(&self) {
        self.redis.delete_by_prefix(KEY_PREFIX).await;
    }
}

/// Deterministic cache key for a text and result count.
fn hashed_key(kind: &str, text: &str, k: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(k.to_string().as_bytes());
    let hash = hasher.finalize();
    format!("{KEY_PREFIX}{kind}:{:x}", hash)
}
