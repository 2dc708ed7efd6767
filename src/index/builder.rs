//! Full index rebuild: reads every topic's metadata and regenerates the
//! entire `_index/` tree from scratch. Grounded on
//! `tools/index_builder_v3.py`'s 2-tier layout, fanned out with a
//! `tokio::task::JoinSet` worker pool rather than a CPU-bound thread pool,
//! since the work here is I/O-bound (reading and writing JSON shard files).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::info;

use crate::bloom::MultiBloomFilter;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Metadata;
use crate::index::model::{
    CategoryShard, CategoryTopicEntry, IndexManifest, KeywordBucketSummary, KeywordDetail,
    ShardConfig, TopicShard, TopicShardEntry, INDEX_TYPE, INDEX_VERSION, KEYWORD_BUCKETS,
};
use crate::router;
use crate::storage::{ObjectStore, StorageLayout};

pub struct IndexBuilder {
    store: Arc<dyn ObjectStore>,
    topic_shard_count: usize,
    bloom_false_positive_rate: f64,
    expected_keywords: usize,
    expected_categories: usize,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        IndexBuilder {
            store,
            topic_shard_count: config.topic_shard_count,
            bloom_false_positive_rate: config.bloom_false_positive_rate,
            expected_keywords: config.expected_keywords,
            expected_categories: config.expected_categories,
        }
    }

    /// Rebuilds the whole index tree and returns the new manifest. Output is
    /// idempotent: re-running with unchanged metadata produces byte-equal
    /// shard files modulo `last_rebuilt`.
    pub async fn rebuild_full(&self) -> Result<IndexManifest> {
        let meta_paths = self.store.list("topics", "*.meta.json").await?;
        info!(count = meta_paths.len(), "rebuilding full index");

        let metadata_list = self.read_all_metadata(meta_paths).await?;

        let manifest = self.build_manifest(&metadata_list);
        let bloom = self.build_bloom(&metadata_list);
        let (summaries, details) = self.build_keyword_tiers(&metadata_list);
        let category_shards = self.build_category_shards(&metadata_list);
        let topic_shards = self.build_topic_shards(&metadata_list);

        self.write_all(&manifest, &bloom, summaries, details, category_shards, topic_shards)
            .await?;

        Ok(manifest)
    }

    async fn read_all_metadata(&self, paths: Vec<String>) -> Result<Vec<Metadata>> {
        let mut tasks = JoinSet::new();
        for path in paths {
            let store = self.store.clone();
            tasks.spawn(async move { store.read(&path).await });
        }

        let mut out = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let read = joined.map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?;
            match read {
                Ok((bytes, _etag)) => match Metadata::parse(&bytes) {
                    Ok(meta) => out.push(meta),
                    Err(e) => tracing::warn!(error = %e, "skipping unparsable metadata file"),
                },
                Err(e) => tracing::warn!(error = %e, "skipping unreadable metadata file"),
            }
        }
        out.sort_by(|a, b| a.topic_id.as_str().cmp(b.topic_id.as_str()));
        Ok(out)
    }

    fn build_manifest(&self, metadata: &[Metadata]) -> IndexManifest {
        let categories = all_categories(metadata);
        let keywords = all_keywords(metadata);

        IndexManifest {
            version: INDEX_VERSION.to_string(),
            index_type: INDEX_TYPE.to_string(),
            total_topics: metadata.len(),
            total_keywords: keywords.len(),
            total_categories: categories.len(),
            categories: categories.into_iter().collect(),
            last_rebuilt: Utc::now(),
            shard_config: ShardConfig {
                keyword_buckets: KEYWORD_BUCKETS.iter().map(|s| s.to_string()).collect(),
                topic_shards: self.topic_shard_count,
            },
        }
    }

    fn build_bloom(&self, metadata: &[Metadata]) -> MultiBloomFilter {
        let categories = all_categories(metadata);
        let keywords = all_keywords(metadata);

        let mut bloom = MultiBloomFilter::new(
            keywords.len().max(self.expected_keywords).max(1),
            categories.len().max(self.expected_categories).max(1),
            self.bloom_false_positive_rate,
        );
        for kw in &keywords {
            bloom.add_keyword(kw);
        }
        for cat in &categories {
            bloom.add_category(cat);
        }
        bloom
    }

    fn build_keyword_tiers(
        &self,
        metadata: &[Metadata],
    ) -> (BTreeMap<&'static str, KeywordBucketSummary>, BTreeMap<(&'static str, String), KeywordDetail>) {
        let mut buckets: BTreeMap<&'static str, BTreeMap<String, BTreeSet<String>>> =
            KEYWORD_BUCKETS.iter().map(|b| (*b, BTreeMap::new())).collect();

        for meta in metadata {
            for keyword in &meta.keywords {
                let lower = keyword.to_lowercase();
                let bucket = router::keyword_bucket(&lower);
                buckets
                    .get_mut(bucket)
                    .unwrap()
                    .entry(lower)
                    .or_default()
                    .insert(meta.topic_id.as_str().to_string());
            }
        }

        let mut summaries = BTreeMap::new();
        let mut details = BTreeMap::new();
        for (bucket, keywords) in buckets {
            summaries.insert(
                bucket,
                KeywordBucketSummary {
                    bucket: bucket.to_string(),
                    keyword_count: keywords.len(),
                    keywords: keywords.keys().cloned().collect(),
                },
            );
            for (keyword, topics) in keywords {
                let topics: Vec<String> = topics.into_iter().collect();
                details.insert(
                    (bucket, keyword.clone()),
                    KeywordDetail { keyword, topic_count: topics.len(), topics },
                );
            }
        }

        (summaries, details)
    }

    fn build_category_shards(&self, metadata: &[Metadata]) -> BTreeMap<String, CategoryShard> {
        let mut shards: BTreeMap<String, BTreeMap<String, CategoryTopicEntry>> = BTreeMap::new();
        for meta in metadata {
            let category = meta.topic_id.category().to_string();
            shards.entry(category).or_default().insert(
                meta.topic_id.as_str().to_string(),
                CategoryTopicEntry {
                    title: meta.title.clone(),
                    keywords: meta.keywords.clone(),
                    related_topics: meta.related_topics.clone(),
                    last_modified: meta.last_modified,
                },
            );
        }

        shards
            .into_iter()
            .map(|(category, topics)| {
                let shard = CategoryShard { category: category.clone(), topic_count: topics.len(), topics };
                (category, shard)
            })
            .collect()
    }

    fn build_topic_shards(&self, metadata: &[Metadata]) -> Vec<TopicShard> {
        let mut shards: Vec<BTreeMap<String, TopicShardEntry>> =
            vec![BTreeMap::new(); self.topic_shard_count];

        for meta in metadata {
            let shard_id = router::topic_shard(&meta.topic_id, self.topic_shard_count);
            shards[shard_id].insert(
                meta.topic_id.as_str().to_string(),
                TopicShardEntry {
                    title: meta.title.clone(),
                    keywords: meta.keywords.clone(),
                    related_topics: meta.related_topics.clone(),
                    category: meta.topic_id.category().to_string(),
                    last_modified: meta.last_modified,
                    last_modified_by: meta.last_modified_by.clone(),
                    version: meta.version,
                },
            );
        }

        shards
            .into_iter()
            .enumerate()
            .map(|(shard_id, topics)| TopicShard { shard_id, topic_count: topics.len(), topics })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_all(
        &self,
        manifest: &IndexManifest,
        bloom: &MultiBloomFilter,
        summaries: BTreeMap<&'static str, KeywordBucketSummary>,
        details: BTreeMap<(&'static str, String), KeywordDetail>,
        category_shards: BTreeMap<String, CategoryShard>,
        topic_shards: Vec<TopicShard>,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();

        spawn_write(&mut tasks, self.store.clone(), StorageLayout::index_manifest_rel().to_string(), manifest)?;
        spawn_write(&mut tasks, self.store.clone(), StorageLayout::bloom_rel().to_string(), bloom)?;

        for (bucket, summary) in summaries {
            spawn_write(&mut tasks, self.store.clone(), StorageLayout::keyword_bucket_summary_rel(bucket), &summary)?;
        }
        for ((bucket, keyword), detail) in details {
            spawn_write(
                &mut tasks,
                self.store.clone(),
                StorageLayout::keyword_detail_rel(bucket, &keyword),
                &detail,
            )?;
        }
        for (category, shard) in category_shards {
            spawn_write(&mut tasks, self.store.clone(), StorageLayout::category_shard_rel(&category), &shard)?;
        }
        for shard in topic_shards {
            let path = StorageLayout::topic_shard_rel(shard.shard_id);
            spawn_write(&mut tasks, self.store.clone(), path, &shard)?;
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))??;
        }
        Ok(())
    }
}

fn spawn_write<T: serde::Serialize>(
    tasks: &mut JoinSet<Result<()>>,
    store: Arc<dyn ObjectStore>,
    path: String,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    tasks.spawn(async move {
        store.write(&path, &body, None).await?;
        Ok(())
    });
    Ok(())
}

fn all_keywords(metadata: &[Metadata]) -> BTreeSet<String> {
    metadata
        .iter()
        .flat_map(|m| m.keywords.iter().map(|k| k.to_lowercase()))
        .collect()
}

fn all_categories(metadata: &[Metadata]) -> BTreeSet<String> {
    metadata.iter().map(|m| m.topic_id.category().to_string()).collect()
}
