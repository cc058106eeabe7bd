//! Downstream snapshot cache
//!
//! After a term is reconciled its course and section rows are republished
//! under `courses-{term}` and `sections-{term}`, replacing whatever was there.
//! Readers go through [`get_or_populate`], which falls back to the store on a
//! miss.
//!
//! Two backends:
//! - [`RedisCache`]: deadpool-managed Redis connections
//! - [`MemoryCache`]: in-process TTL map, used when no Redis URL is configured
//!   or Redis is unreachable

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::models::{Course, Section, Term};
use crate::storage::SnapshotStore;

/// Byte-level key/value cache with per-entry TTL
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    fn backend(&self) -> &'static str;
}

// ============================================================================
// Redis backend
// ============================================================================

/// Redis cache client
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    /// Build the pool and check the server answers PING
    pub async fn new(url: &str, pool_size: usize) -> Result<Self> {
        let pool = PoolConfig::from_url(url)
            .builder()
            .map_err(|e| Error::cache(format!("Failed to create pool builder: {e}")))?
            .max_size(pool_size.max(1))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::cache(format!("Failed to create Redis connection pool: {e}")))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| Error::cache(format!("Failed to get Redis connection: {e}")))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::cache(format!("Failed to ping Redis: {e}")))?;

        tracing::info!(url = %url, "Connected to Redis");

        Ok(Self { pool })
    }
}

#[async_trait]
impl SnapshotCache for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await.map_err(Error::cache)?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(Error::cache)?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(Error::cache)?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(Error::cache)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

// ============================================================================
// In-process backend
// ============================================================================

/// In-process cache; entries expire lazily on read
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if *expires > Instant::now() => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Redis when configured and reachable, otherwise the in-process cache
pub async fn connect(config: &CacheConfig) -> Arc<dyn SnapshotCache> {
    let Some(url) = config.redis_url.as_deref() else {
        return Arc::new(MemoryCache::new());
    };

    match RedisCache::new(url, config.pool_size).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            tracing::warn!(error = %e, "Redis cache unavailable, continuing with in-process cache");
            Arc::new(MemoryCache::new())
        }
    }
}

// ============================================================================
// Typed helpers
// ============================================================================

pub async fn get_json<T: DeserializeOwned>(cache: &dyn SnapshotCache, key: &str) -> Result<Option<T>> {
    match cache.get_raw(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn SnapshotCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    cache.set_raw(key, serde_json::to_vec(value)?, ttl).await
}

/// Read `key`, or compute the value, store it with `ttl` and return it.
///
/// A failed write is logged; the computed value is still returned.
pub async fn get_or_populate<T, F, Fut>(
    cache: &dyn SnapshotCache,
    key: &str,
    ttl: Duration,
    populate: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(cached) = get_json(cache, key).await? {
        tracing::debug!(key, "Cache hit");
        return Ok(cached);
    }

    tracing::debug!(key, "Cache miss");
    let value = populate().await?;

    if let Err(e) = set_json(cache, key, &value, ttl).await {
        tracing::warn!(key, error = %e, "Failed to populate cache");
    }

    Ok(value)
}

// ============================================================================
// Republisher
// ============================================================================

/// Rows written by one republish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepublishStats {
    pub courses: usize,
    pub sections: usize,
}

/// Pushes per-term snapshots from the store to the cache
pub struct Republisher {
    cache: Arc<dyn SnapshotCache>,
    store: Arc<dyn SnapshotStore>,
    key_prefix: String,
    ttl: Duration,
}

impl Republisher {
    pub fn new(cache: Arc<dyn SnapshotCache>, store: Arc<dyn SnapshotStore>, config: &CacheConfig) -> Self {
        Self {
            cache,
            store,
            key_prefix: config.key_prefix.clone(),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    fn key(&self, kind: &str, term: Term) -> String {
        if self.key_prefix.is_empty() {
            format!("{kind}-{term}")
        } else {
            format!("{}:{kind}-{term}", self.key_prefix)
        }
    }

    pub fn courses_key(&self, term: Term) -> String {
        self.key("courses", term)
    }

    pub fn sections_key(&self, term: Term) -> String {
        self.key("sections", term)
    }

    /// Replace the cached course and section lists of a term
    pub async fn republish(&self, term: Term) -> Result<RepublishStats> {
        let courses = self.store.courses_for_term(term)?;
        let sections = self.store.sections_for_term(term)?;

        set_json(self.cache.as_ref(), &self.courses_key(term), &courses, self.ttl).await?;
        set_json(self.cache.as_ref(), &self.sections_key(term), &sections, self.ttl).await?;

        tracing::info!(
            %term,
            backend = self.cache.backend(),
            courses = courses.len(),
            sections = sections.len(),
            "Republished term snapshot"
        );

        Ok(RepublishStats {
            courses: courses.len(),
            sections: sections.len(),
        })
    }

    /// Cached courses of a term, populated from the store on a miss
    pub async fn courses(&self, term: Term) -> Result<Vec<Course>> {
        let store = Arc::clone(&self.store);
        get_or_populate(self.cache.as_ref(), &self.courses_key(term), self.ttl, || async move {
            store.courses_for_term(term)
        })
        .await
    }

    /// Cached sections of a term, populated from the store on a miss
    pub async fn sections(&self, term: Term) -> Result<Vec<Section>> {
        let store = Arc::clone(&self.store);
        get_or_populate(self.cache.as_ref(), &self.sections_key(term), self.ttl, || async move {
            store.sections_for_term(term)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Status;
    use crate::models::NewSection;
    use crate::reconcile::apply_course;
    use crate::storage::SqliteSnapshotStore;
    use crate::upstream::CourseRecord;

    fn term() -> Term {
        "1252".parse().unwrap()
    }

    fn seeded_store() -> Arc<dyn SnapshotStore> {
        let store = SqliteSnapshotStore::in_memory().unwrap();
        let record = CourseRecord {
            course: Course {
                id: "002051-1252".to_string(),
                listing_id: "002051".to_string(),
                term: term(),
                code: "COS126".to_string(),
                title: "Computer Science".to_string(),
                description: None,
                status: Status::Open,
                dists: Vec::new(),
                grading_basis: None,
                has_final: None,
                grading: Default::default(),
            },
            sections: vec![NewSection {
                title: "L01".to_string(),
                num: "1".to_string(),
                room: Some("Friend 101".to_string()),
                tot: 100,
                cap: 150,
                days: 10,
                start_time: 9.0,
                end_time: 17.0,
                status: Status::Open,
            }],
            instructors: Vec::new(),
            departments: ["COS".to_string()].into_iter().collect(),
            unresolved_instructors: 0,
        };
        apply_course(&store, &record).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_memory_cache_expiry() {
        let cache = MemoryCache::new();
        cache.set_raw("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap(), Some(b"v".to_vec()));

        cache.set_raw("gone", b"v".to_vec(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get_raw("gone").await.unwrap(), None);
        assert_eq!(cache.get_raw("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_or_populate_only_computes_on_miss() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        let first: Vec<u32> = get_or_populate(&cache, "nums", ttl, || async { Ok(vec![1, 2]) })
            .await
            .unwrap();
        assert_eq!(first, vec![1, 2]);

        let second: Vec<u32> = get_or_populate(&cache, "nums", ttl, || async {
            Err(Error::cache("populate should not run on a hit"))
        })
        .await
        .unwrap();
        assert_eq!(second, vec![1, 2]);
    }

    #[test]
    fn test_keys_with_and_without_prefix() {
        let store = seeded_store();
        let cache: Arc<dyn SnapshotCache> = Arc::new(MemoryCache::new());

        let bare = Republisher::new(Arc::clone(&cache), Arc::clone(&store), &CacheConfig::default());
        assert_eq!(bare.courses_key(term()), "courses-1252");
        assert_eq!(bare.sections_key(term()), "sections-1252");

        let config = CacheConfig {
            key_prefix: "regsync".to_string(),
            ..CacheConfig::default()
        };
        let prefixed = Republisher::new(cache, store, &config);
        assert_eq!(prefixed.courses_key(term()), "regsync:courses-1252");
    }

    #[tokio::test]
    async fn test_republish_replaces_term_snapshot() {
        let store = seeded_store();
        let cache: Arc<dyn SnapshotCache> = Arc::new(MemoryCache::new());
        let republisher = Republisher::new(Arc::clone(&cache), store, &CacheConfig::default());

        set_json(cache.as_ref(), "courses-1252", &vec!["stale"], Duration::from_secs(60))
            .await
            .unwrap();

        let stats = republisher.republish(term()).await.unwrap();
        assert_eq!(stats, RepublishStats { courses: 1, sections: 1 });

        let courses: Vec<Course> = get_json(cache.as_ref(), "courses-1252").await.unwrap().unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].code, "COS126");

        let sections = republisher.sections(term()).await.unwrap();
        assert_eq!(sections[0].data.room.as_deref(), Some("Friend 101"));
    }
}
