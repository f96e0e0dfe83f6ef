/// Optional Redis cache.
///
/// Every operation degrades to a miss (`None`) or `false` when Redis is not configured or
/// not reachable; failures are logged at `warn` and never surface to callers.
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::warn;

const SCAN_BATCH: usize = 100;

pub struct RedisCache {
    client: Option<redis::Client>,
}

impl RedisCache {
    /// An unparsable URL disables the cache rather than failing startup.
    pub fn new(url: Option<&str>) -> Self {
        let client = url.and_then(|u| {
            redis::Client::open(u)
                .inspect_err(|e| warn!(error = %e, url = u, "invalid redis url, cache disabled"))
                .ok()
        });
        Self { client }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        self.client
            .as_ref()?
            .get_multiplexed_async_connection()
            .await
            .inspect_err(|e| warn!(error = %e, "redis connection failed"))
            .ok()
    }

    /// PING the server.
    pub async fn is_available(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis GET failed"))
            .ok()
            .flatten()
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis SETEX failed"))
            .is_ok()
    }

    /// Delete every key starting with `prefix`, walking the keyspace with SCAN.
    pub async fn delete_by_prefix(&self, prefix: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };

        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;
        loop {
            let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let (next_cursor, keys) = match scanned {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, pattern, "redis SCAN failed");
                    return false;
                }
            };

            if !keys.is_empty() {
                if let Err(e) = conn.del::<_, ()>(&keys).await {
                    warn!(error = %e, pattern, "redis DEL failed during prefix delete");
                    return false;
                }
                deleted += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        tracing::debug!(pattern, deleted, "cache entries invalidated");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::RedisCache;

    #[tokio::test]
    async fn disabled_cache_degrades_to_noops() {
        let cache = RedisCache::disabled();
        assert!(!cache.is_available().await);
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.set_with_ttl("k", "v", 60).await);
        assert!(!cache.delete_by_prefix("wcag:").await);
    }

    #[tokio::test]
    async fn invalid_url_disables_cache() {
        let cache = RedisCache::new(Some("not a url"));
        assert!(!cache.is_available().await);
    }
}
