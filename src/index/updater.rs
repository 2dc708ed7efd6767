//! Incremental index maintenance: touches only the shards affected by a
//! single topic write or delete, instead of rebuilding everything.
//! Grounded on `tools/index_builder_v3.py`'s
//! `update_keyword`, generalized to also maintain the category and topic
//! shards and the summary/bloom counters.
//!
//! The updater always diffs against the topic's previous metadata itself
//! (the caller passes it in) rather than trusting a derived diff computed
//! elsewhere, so a stale "what changed" computation can't corrupt shards
//! out from under a concurrent writer: every shard update is a
//! read-current / modify / write-with-the-etag-just-read cycle, retried
//! up to `retry_limit` times on conflict.

use std::sync::Arc;

use chrono::Utc;

use crate::bloom::MultiBloomFilter;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Metadata;
use crate::index::model::{
    CategoryShard, CategoryTopicEntry, IndexManifest, KeywordBucketSummary, KeywordDetail,
    TopicShard, TopicShardEntry,
};
use crate::router;
use crate::storage::{ObjectStore, StorageLayout};

pub struct IncrementalUpdater {
    store: Arc<dyn ObjectStore>,
    topic_shard_count: usize,
    bloom_false_positive_rate: f64,
    expected_keywords: usize,
    expected_categories: usize,
    retry_limit: u32,
}

impl IncrementalUpdater {
    pub fn new(store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        IncrementalUpdater {
            store,
            topic_shard_count: config.topic_shard_count,
            bloom_false_positive_rate: config.bloom_false_positive_rate,
            expected_keywords: config.expected_keywords,
            expected_categories: config.expected_categories,
            retry_limit: config.updater_retry_limit,
        }
    }

    /// Applies a topic write. `previous` is the topic's prior metadata, if
    /// any; pass `None` only for a brand-new topic.
    pub async fn upsert_topic(&self, new: &Metadata, previous: Option<&Metadata>) -> Result<()> {
        let old_keywords: Vec<String> = previous.map(|p| p.keywords.clone()).unwrap_or_default();

        let added: Vec<&String> = new.keywords.iter().filter(|k| !old_keywords.contains(k)).collect();
        let removed: Vec<&String> = old_keywords.iter().filter(|k| !new.keywords.contains(k)).collect();

        for kw in added {
            self.update_keyword(kw, new.topic_id.as_str(), false).await?;
        }
        for kw in removed {
            self.update_keyword(kw, new.topic_id.as_str(), true).await?;
        }

        self.update_category_shard(new).await?;
        self.update_topic_shard(new).await?;
        self.update_bloom(&new.keywords, new.topic_id.category()).await?;
        self.bump_manifest_topic_count(if previous.is_none() { 1 } else { 0 }).await?;
        Ok(())
    }

    /// Removes a topic from every shard it appears in.
    pub async fn remove_topic(&self, old: &Metadata) -> Result<()> {
        for kw in &old.keywords {
            self.update_keyword(kw, old.topic_id.as_str(), true).await?;
        }

        self.remove_from_category_shard(old).await?;
        self.remove_from_topic_shard(old).await?;
        self.bump_manifest_topic_count(-1).await?;
        Ok(())
    }

    async fn update_keyword(&self, keyword: &str, topic_id: &str, remove: bool) -> Result<()> {
        let keyword = keyword.to_lowercase();
        let bucket = router::keyword_bucket(&keyword);
        let topic_id = topic_id.to_string();

        let detail_path = StorageLayout::keyword_detail_rel(bucket, &keyword);
        let kw_for_default = keyword.clone();
        let final_topic_count = self
            .read_modify_write(&detail_path, move |current: Option<KeywordDetail>| {
                let mut detail = current.unwrap_or_else(|| KeywordDetail {
                    keyword: kw_for_default.clone(),
                    topic_count: 0,
                    topics: vec![],
                });
                if remove {
                    detail.topics.retain(|t| t != &topic_id);
                } else if !detail.topics.iter().any(|t| t == &topic_id) {
                    detail.topics.push(topic_id.clone());
                }
                detail.topic_count = detail.topics.len();
                detail
            })
            .await?
            .topic_count;

        if final_topic_count == 0 {
            let _ = self.store.delete(&detail_path).await;
        }

        let summary_path = StorageLayout::keyword_bucket_summary_rel(bucket);
        self.read_modify_write(&summary_path, move |current: Option<KeywordBucketSummary>| {
            let mut summary = current.unwrap_or_else(|| KeywordBucketSummary {
                bucket: bucket.to_string(),
                keyword_count: 0,
                keywords: vec![],
            });
            if final_topic_count == 0 {
                summary.keywords.retain(|k| k != &keyword);
            } else if !summary.keywords.iter().any(|k| k == &keyword) {
                summary.keywords.push(keyword.clone());
                summary.keywords.sort();
            }
            summary.keyword_count = summary.keywords.len();
            summary
        })
        .await?;

        Ok(())
    }

    async fn update_category_shard(&self, meta: &Metadata) -> Result<()> {
        let category = meta.topic_id.category().to_string();
        let path = StorageLayout::category_shard_rel(&category);
        let entry = CategoryTopicEntry {
            title: meta.title.clone(),
            keywords: meta.keywords.clone(),
            related_topics: meta.related_topics.clone(),
            last_modified: meta.last_modified,
        };
        let topic_id = meta.topic_id.as_str().to_string();
        self.read_modify_write(&path, move |current: Option<CategoryShard>| {
            let mut shard = current.unwrap_or_else(|| CategoryShard {
                category: category.clone(),
                topic_count: 0,
                topics: Default::default(),
            });
            shard.topics.insert(topic_id.clone(), entry.clone());
            shard.topic_count = shard.topics.len();
            shard
        })
        .await?;
        Ok(())
    }

    async fn remove_from_category_shard(&self, meta: &Metadata) -> Result<()> {
        let category = meta.topic_id.category().to_string();
        let path = StorageLayout::category_shard_rel(&category);
        if !self.store.exists(&path).await? {
            return Ok(());
        }
        let topic_id = meta.topic_id.as_str().to_string();
        self.read_modify_write(&path, move |current: Option<CategoryShard>| {
            let mut shard = current.unwrap_or_else(|| CategoryShard {
                category: category.clone(),
                topic_count: 0,
                topics: Default::default(),
            });
            shard.topics.remove(&topic_id);
            shard.topic_count = shard.topics.len();
            shard
        })
        .await?;
        Ok(())
    }

    async fn update_topic_shard(&self, meta: &Metadata) -> Result<()> {
        let shard_id = router::topic_shard(&meta.topic_id, self.topic_shard_count);
        let path = StorageLayout::topic_shard_rel(shard_id);
        let entry = TopicShardEntry {
            title: meta.title.clone(),
            keywords: meta.keywords.clone(),
            related_topics: meta.related_topics.clone(),
            category: meta.topic_id.category().to_string(),
            last_modified: meta.last_modified,
            last_modified_by: meta.last_modified_by.clone(),
            version: meta.version,
        };
        let topic_id = meta.topic_id.as_str().to_string();
        self.read_modify_write(&path, move |current: Option<TopicShard>| {
            let mut shard = current.unwrap_or_else(|| TopicShard { shard_id, topic_count: 0, topics: Default::default() });
            shard.topics.insert(topic_id.clone(), entry.clone());
            shard.topic_count = shard.topics.len();
            shard
        })
        .await?;
        Ok(())
    }

    async fn remove_from_topic_shard(&self, meta: &Metadata) -> Result<()> {
        let shard_id = router::topic_shard(&meta.topic_id, self.topic_shard_count);
        let path = StorageLayout::topic_shard_rel(shard_id);
        if !self.store.exists(&path).await? {
            return Ok(());
        }
        let topic_id = meta.topic_id.as_str().to_string();
        self.read_modify_write(&path, move |current: Option<TopicShard>| {
            let mut shard = current.unwrap_or_else(|| TopicShard { shard_id, topic_count: 0, topics: Default::default() });
            shard.topics.remove(&topic_id);
            shard.topic_count = shard.topics.len();
            shard
        })
        .await?;
        Ok(())
    }

    async fn update_bloom(&self, keywords: &[String], category: &str) -> Result<()> {
        let path = StorageLayout::bloom_rel();
        let keywords = keywords.to_vec();
        let category = category.to_string();
        let expected_keywords = self.expected_keywords;
        let expected_categories = self.expected_categories;
        let fp_rate = self.bloom_false_positive_rate;
        self.read_modify_write(path, move |current: Option<MultiBloomFilter>| {
            let mut bloom = current.unwrap_or_else(|| MultiBloomFilter::new(expected_keywords, expected_categories, fp_rate));
            for kw in &keywords {
                bloom.add_keyword(kw);
            }
            bloom.add_category(&category);
            bloom
        })
        .await?;
        Ok(())
    }

    async fn bump_manifest_topic_count(&self, delta: i64) -> Result<()> {
        let path = StorageLayout::index_manifest_rel();
        let mut attempt = 0;
        loop {
            let Some((mut manifest, etag)) = self.read_json::<IndexManifest>(path).await? else {
                return Ok(());
            };
            manifest.total_topics = (manifest.total_topics as i64 + delta).max(0) as usize;
            manifest.last_rebuilt = Utc::now();
            let body = serde_json::to_vec_pretty(&manifest)?;
            match self.store.write(path, &body, Some(&etag)).await {
                Ok(_) => return Ok(()),
                Err(e) if e.kind == ErrorKind::Conflict => {
                    attempt += 1;
                    if attempt >= self.retry_limit {
                        return Err(Error::conflict(
                            format!("exhausted retries writing {path}"),
                            e.fresh_etag.unwrap_or_default(),
                        ));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<(T, String)>> {
        match self.store.read(path).await {
            Ok((bytes, etag)) => Ok(Some((serde_json::from_slice(&bytes)?, etag))),
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads `path` (or `None` if absent), applies `mutate`, and writes the
    /// result back with the etag just read as the optimistic-concurrency
    /// check. Retries the whole cycle on conflict up to `retry_limit`.
    async fn read_modify_write<T, F>(&self, path: &str, mut mutate: F) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnMut(Option<T>) -> T,
    {
        let mut attempt = 0;
        loop {
            let (current, etag) = match self.read_json::<T>(path).await? {
                Some((v, e)) => (Some(v), Some(e)),
                None => (None, None),
            };
            let updated = mutate(current);
            let body = serde_json::to_vec_pretty(&updated)?;
            match self.store.write(path, &body, etag.as_deref()).await {
                Ok(_) => return Ok(updated),
                Err(e) if e.kind == ErrorKind::Conflict => {
                    attempt += 1;
                    if attempt >= self.retry_limit {
                        return Err(Error::conflict(
                            format!("exhausted retries writing {path}"),
                            e.fresh_etag.unwrap_or_default(),
                        ));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FilesystemObjectStore;
    use std::collections::BTreeSet;

    fn meta(id: &str, title: &str, keywords: &[&str]) -> Metadata {
        Metadata {
            topic_id: crate::core::types::TopicId::new(id),
            title: title.to_string(),
            version: 1,
            etag: String::new(),
            last_modified: Utc::now(),
            last_modified_by: "tester".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            related_topics: vec![],
            citations: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn incremental_update_matches_full_rebuild() {
        use crate::index::builder::IndexBuilder;
        use crate::index::reader::IndexReader;

        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let config = Config::new(dir.path());

        IndexBuilder::new(store.clone(), &config).rebuild_full().await.unwrap();

        let updater = IncrementalUpdater::new(store.clone(), &config);
        let m = meta("python/gil", "The GIL", &["python", "concurrency"]);
        let path = StorageLayout::topic_meta_rel(&m.topic_id);
        store.write(&path, &m.to_json_pretty().unwrap(), None).await.unwrap();
        updater.upsert_topic(&m, None).await.unwrap();

        let reader = IndexReader::new(store.clone(), &config);
        let results = reader.search_keyword("python").await.unwrap();
        assert_eq!(results, vec![m.topic_id.clone()]);

        let cat = reader.category_topics("python").await.unwrap();
        assert_eq!(cat.len(), 1);
    }

    #[tokio::test]
    async fn removing_a_keyword_drops_empty_detail_file() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let config = Config::new(dir.path());
        crate::index::builder::IndexBuilder::new(store.clone(), &config).rebuild_full().await.unwrap();

        let updater = IncrementalUpdater::new(store.clone(), &config);
        let old = meta("python/gil", "The GIL", &["python"]);
        updater.upsert_topic(&old, None).await.unwrap();

        let new = meta("python/gil", "The GIL", &[]);
        updater.upsert_topic(&new, Some(&old)).await.unwrap();

        let detail_path = StorageLayout::keyword_detail_rel("p-t", "python");
        assert!(!store.exists(&detail_path).await.unwrap());
    }
}
