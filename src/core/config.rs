use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the knowledge base.
    pub root: PathBuf,

    /// Opaque identifier of the agent/process making writes, used to
    /// populate `last_modified_by` / `processed_by` / lock `holder_id`.
    pub writer_id: String,

    /// Number of topic shards at generation 3 (spec default: 100).
    pub topic_shard_count: usize,

    /// Target Bloom filter false-positive rate.
    pub bloom_false_positive_rate: f64,
    pub expected_keywords: usize,
    pub expected_categories: usize,

    /// Default lock lifetime once acquired.
    pub lock_ttl: std::time::Duration,
    /// Default time a caller is willing to block waiting for a lock.
    pub wait_ttl: std::time::Duration,
    /// Sleep between lock-acquisition retries while waiting.
    pub lock_poll_interval: std::time::Duration,

    /// Bounded retry count for incremental updater's read-modify-write
    /// shard updates under ETag conflict.
    pub updater_retry_limit: u32,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Config { root: root.into(), ..Config::default() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("./knowledge_base"),
            writer_id: "unknown".to_string(),

            topic_shard_count: 100,

            bloom_false_positive_rate: 0.01,
            expected_keywords: 10_000,
            expected_categories: 100,

            lock_ttl: std::time::Duration::from_secs(30),
            wait_ttl: std::time::Duration::from_secs(30),
            lock_poll_interval: std::time::Duration::from_millis(500),

            updater_retry_limit: 5,
        }
    }
}
