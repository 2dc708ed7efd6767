//! Cached, bounded-I/O index lookups. Grounded on
//! `tools/sharded_index_reader_v3.py`'s two-tier keyword lookup and
//! per-shard caching, translated to `parking_lot::Mutex`-guarded `lru`
//! caches matching how this codebase's other reader-side caches are built.

use std::collections::BTreeMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::bloom::MultiBloomFilter;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{CacheStats, KnowledgeBaseStats};
use crate::core::types::TopicId;
use crate::index::model::{CategoryShard, IndexManifest, KeywordBucketSummary, KeywordDetail, TopicShard};
use crate::router;
use crate::storage::{ObjectStore, StorageLayout};

const CACHE_CAPACITY: usize = 256;

pub struct IndexReader {
    store: Arc<dyn ObjectStore>,
    topic_shard_count: usize,

    manifest_cache: Mutex<Option<IndexManifest>>,
    bloom_cache: Mutex<Option<Arc<MultiBloomFilter>>>,
    keyword_summary_cache: Mutex<LruCache<String, Arc<KeywordBucketSummary>>>,
    keyword_detail_cache: Mutex<LruCache<(String, String), Arc<KeywordDetail>>>,
    category_shard_cache: Mutex<LruCache<String, Arc<CategoryShard>>>,
    topic_shard_cache: Mutex<LruCache<usize, Arc<TopicShard>>>,

    stats: Mutex<CacheStats>,
}

impl IndexReader {
    pub fn new(store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        let cap = std::num::NonZeroUsize::new(CACHE_CAPACITY).unwrap();
        IndexReader {
            store,
            topic_shard_count: config.topic_shard_count,
            manifest_cache: Mutex::new(None),
            bloom_cache: Mutex::new(None),
            keyword_summary_cache: Mutex::new(LruCache::new(cap)),
            keyword_detail_cache: Mutex::new(LruCache::new(cap)),
            category_shard_cache: Mutex::new(LruCache::new(cap)),
            topic_shard_cache: Mutex::new(LruCache::new(cap)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn invalidate(&self) {
        *self.manifest_cache.lock() = None;
        *self.bloom_cache.lock() = None;
        self.keyword_summary_cache.lock().clear();
        self.keyword_detail_cache.lock().clear();
        self.category_shard_cache.lock().clear();
        self.topic_shard_cache.lock().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    async fn manifest(&self) -> Result<IndexManifest> {
        if let Some(m) = self.manifest_cache.lock().clone() {
            self.stats.lock().hit_count += 1;
            return Ok(m);
        }
        self.stats.lock().miss_count += 1;
        let (bytes, _) = self.store.read(StorageLayout::index_manifest_rel()).await?;
        let manifest: IndexManifest = serde_json::from_slice(&bytes)?;
        *self.manifest_cache.lock() = Some(manifest.clone());
        Ok(manifest)
    }

    async fn bloom(&self) -> Result<Arc<MultiBloomFilter>> {
        if let Some(b) = self.bloom_cache.lock().clone() {
            self.stats.lock().hit_count += 1;
            return Ok(b);
        }
        self.stats.lock().miss_count += 1;
        let (bytes, _) = self.store.read(StorageLayout::bloom_rel()).await?;
        let bloom: MultiBloomFilter = serde_json::from_slice(&bytes)?;
        let bloom = Arc::new(bloom);
        *self.bloom_cache.lock() = Some(bloom.clone());
        Ok(bloom)
    }

    async fn keyword_summary(&self, bucket: &str) -> Result<Option<Arc<KeywordBucketSummary>>> {
        if let Some(s) = self.keyword_summary_cache.lock().get(bucket).cloned() {
            self.stats.lock().hit_count += 1;
            return Ok(Some(s));
        }
        self.stats.lock().miss_count += 1;
        let path = StorageLayout::keyword_bucket_summary_rel(bucket);
        match self.store.read(&path).await {
            Ok((bytes, _)) => {
                let summary: KeywordBucketSummary = serde_json::from_slice(&bytes)?;
                let summary = Arc::new(summary);
                self.keyword_summary_cache.lock().put(bucket.to_string(), summary.clone());
                Ok(Some(summary))
            }
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn keyword_detail(&self, bucket: &str, keyword: &str) -> Result<Option<Arc<KeywordDetail>>> {
        let cache_key = (bucket.to_string(), keyword.to_string());
        if let Some(d) = self.keyword_detail_cache.lock().get(&cache_key).cloned() {
            self.stats.lock().hit_count += 1;
            return Ok(Some(d));
        }
        self.stats.lock().miss_count += 1;
        let path = StorageLayout::keyword_detail_rel(bucket, keyword);
        match self.store.read(&path).await {
            Ok((bytes, _)) => {
                let detail: KeywordDetail = serde_json::from_slice(&bytes)?;
                let detail = Arc::new(detail);
                self.keyword_detail_cache.lock().put(cache_key, detail.clone());
                Ok(Some(detail))
            }
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn category_shard(&self, category: &str) -> Result<Option<Arc<CategoryShard>>> {
        if let Some(s) = self.category_shard_cache.lock().get(category).cloned() {
            self.stats.lock().hit_count += 1;
            return Ok(Some(s));
        }
        self.stats.lock().miss_count += 1;
        let path = StorageLayout::category_shard_rel(category);
        match self.store.read(&path).await {
            Ok((bytes, _)) => {
                let shard: CategoryShard = serde_json::from_slice(&bytes)?;
                let shard = Arc::new(shard);
                self.category_shard_cache.lock().put(category.to_string(), shard.clone());
                Ok(Some(shard))
            }
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn topic_shard(&self, shard_id: usize) -> Result<Option<Arc<TopicShard>>> {
        if let Some(s) = self.topic_shard_cache.lock().get(&shard_id).cloned() {
            self.stats.lock().hit_count += 1;
            return Ok(Some(s));
        }
        self.stats.lock().miss_count += 1;
        let path = StorageLayout::topic_shard_rel(shard_id);
        match self.store.read(&path).await {
            Ok((bytes, _)) => {
                let shard: TopicShard = serde_json::from_slice(&bytes)?;
                let shard = Arc::new(shard);
                self.topic_shard_cache.lock().put(shard_id, shard.clone());
                Ok(Some(shard))
            }
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Two-tier keyword search, bounded at ~150KB of I/O per query
    /// (bloom + bucket summary + one detail file).
    pub async fn search_keyword(&self, query: &str) -> Result<Vec<TopicId>> {
        let mut matches: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

        for word in query.split_whitespace() {
            let word = word.to_lowercase();
            let bloom = self.bloom().await?;
            if !bloom.keyword_might_exist(&word) {
                continue;
            }

            let bucket = router::keyword_bucket(&word);
            let Some(summary) = self.keyword_summary(bucket).await? else { continue };
            if !summary.keywords.iter().any(|k| k == &word) {
                continue;
            }

            if let Some(detail) = self.keyword_detail(bucket, &word).await? {
                matches.extend(detail.topics.iter().cloned());
            }
        }

        Ok(matches.into_iter().map(TopicId::new).collect())
    }

    /// Bounded at ~500KB of I/O (bloom + one category shard).
    pub async fn category_topics(&self, category: &str) -> Result<BTreeMap<String, TopicId>> {
        let bloom = self.bloom().await?;
        if !bloom.category_might_exist(category) {
            return Ok(BTreeMap::new());
        }
        match self.category_shard(category).await? {
            Some(shard) => Ok(shard.topics.keys().map(|id| (id.clone(), TopicId::new(id.clone()))).collect()),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Bounded at the single-shard size (~4MB at 10M topics with 100
    /// shards).
    pub async fn topic_metadata(&self, topic_id: &TopicId) -> Result<crate::index::model::TopicShardEntry> {
        let shard_id = router::topic_shard(topic_id, self.topic_shard_count);
        let shard = self
            .topic_shard(shard_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("topic not found: {topic_id}")))?;
        shard
            .topics
            .get(topic_id.as_str())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("topic not found: {topic_id}")))
    }

    pub async fn all_categories(&self) -> Result<Vec<String>> {
        Ok(self.manifest().await?.categories)
    }

    pub async fn statistics(&self) -> Result<KnowledgeBaseStats> {
        let manifest = self.manifest().await?;
        Ok(KnowledgeBaseStats {
            total_topics: manifest.total_topics,
            total_keywords: manifest.total_keywords,
            total_categories: manifest.total_categories,
            total_citations: 0,
            total_logs: 0,
            categories: manifest.categories,
            index_version: manifest.version,
            last_rebuilt: Some(manifest.last_rebuilt.to_rfc3339()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Metadata;
    use crate::index::builder::IndexBuilder;
    use crate::storage::FilesystemObjectStore;
    use std::collections::BTreeSet;

    async fn seed_topic(store: &Arc<dyn ObjectStore>, id: &str, title: &str, keywords: &[&str]) {
        let meta = Metadata {
            topic_id: TopicId::new(id),
            title: title.to_string(),
            version: 1,
            etag: String::new(),
            last_modified: chrono::Utc::now(),
            last_modified_by: "tester".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            related_topics: vec![],
            citations: BTreeSet::new(),
        };
        let path = StorageLayout::topic_meta_rel(&meta.topic_id);
        store.write(&path, &meta.to_json_pretty().unwrap(), None).await.unwrap();
    }

    #[tokio::test]
    async fn search_and_category_and_topic_lookup_after_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        seed_topic(&store, "python/gil", "The GIL", &["python", "concurrency"]).await;
        seed_topic(&store, "python/asyncio", "Asyncio", &["python", "async"]).await;

        let config = Config::new(dir.path());
        let builder = IndexBuilder::new(store.clone(), &config);
        builder.rebuild_full().await.unwrap();

        let reader = IndexReader::new(store, &config);
        let results = reader.search_keyword("python").await.unwrap();
        assert_eq!(results.len(), 2);

        let cat = reader.category_topics("python").await.unwrap();
        assert_eq!(cat.len(), 2);

        let meta = reader.topic_metadata(&TopicId::new("python/gil")).await.unwrap();
        assert_eq!(meta.title, "The GIL");
    }

    #[tokio::test]
    async fn missing_keyword_short_circuits_on_bloom() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        seed_topic(&store, "python/gil", "The GIL", &["python"]).await;

        let config = Config::new(dir.path());
        IndexBuilder::new(store.clone(), &config).rebuild_full().await.unwrap();

        let reader = IndexReader::new(store, &config);
        let results = reader.search_keyword("nonexistentword").await.unwrap();
        assert!(results.is_empty());
    }
}
