//! On-disk JSON shapes for the generation-3, 2-tier sharded index.
//! Every shape here round-trips through
//! `serde_json` byte-for-byte given the same input set, which is what
//! makes a full rebuild idempotent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::TopicId;

pub const INDEX_VERSION: &str = "3.0.0";
pub const INDEX_TYPE: &str = "2-tier-sharded";
pub const KEYWORD_BUCKETS: [&str; 5] = ["a-e", "f-j", "k-o", "p-t", "u-z"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub keyword_buckets: Vec<String>,
    pub topic_shards: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: String,
    pub index_type: String,
    pub total_topics: usize,
    pub total_keywords: usize,
    pub total_categories: usize,
    pub categories: Vec<String>,
    pub last_rebuilt: DateTime<Utc>,
    pub shard_config: ShardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordBucketSummary {
    pub bucket: String,
    pub keyword_count: usize,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordDetail {
    pub keyword: String,
    pub topic_count: usize,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTopicEntry {
    pub title: String,
    pub keywords: Vec<String>,
    pub related_topics: Vec<TopicId>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryShard {
    pub category: String,
    pub topic_count: usize,
    pub topics: BTreeMap<String, CategoryTopicEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicShardEntry {
    pub title: String,
    pub keywords: Vec<String>,
    pub related_topics: Vec<TopicId>,
    pub category: String,
    pub last_modified: DateTime<Utc>,
    pub last_modified_by: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicShard {
    pub shard_id: usize,
    pub topic_count: usize,
    pub topics: BTreeMap<String, TopicShardEntry>,
}
