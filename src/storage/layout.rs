use std::fs;
use std::path::PathBuf;

use crate::core::error::Result;
use crate::core::types::TopicId;

/// Directory structure for the on-disk knowledge base.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
    pub topics_dir: PathBuf,
    pub citations_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub index_dir: PathBuf,
    pub locks_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let topics_dir = base_dir.join("topics");
        let citations_dir = base_dir.join("citations");
        let logs_dir = base_dir.join("logs");
        let index_dir = base_dir.join("_index");
        let locks_dir = base_dir.join("_locks");

        fs::create_dir_all(&topics_dir)?;
        fs::create_dir_all(&citations_dir)?;
        fs::create_dir_all(&logs_dir)?;
        fs::create_dir_all(&index_dir)?;
        fs::create_dir_all(&locks_dir)?;

        Ok(StorageLayout {
            base_dir,
            topics_dir,
            citations_dir,
            logs_dir,
            index_dir,
            locks_dir,
        })
    }

    pub fn topic_body_rel(id: &TopicId) -> String {
        format!("topics/{}/{}.md", id.category(), id.slug())
    }

    pub fn topic_meta_rel(id: &TopicId) -> String {
        format!("topics/{}/{}.meta.json", id.category(), id.slug())
    }

    /// `date` is `YYYY-MM-DD`, matching `kb_tools.py::add_citation`'s
    /// `citations/{citation_id}_{timestamp}.json` naming.
    pub fn citation_rel(citation_id: &str, date: &str) -> String {
        format!("citations/{citation_id}_{date}.json")
    }

    /// Glob used to find a citation file by ID alone, since the filename
    /// also carries the date it was written on.
    pub fn citation_glob(citation_id: &str) -> String {
        format!("{citation_id}_*.json")
    }

    /// `timestamp` is `YYYYMMDD_HHMMSS`, matching `kb_tools.py::log_operation`'s
    /// `logs/{agent_id}_{timestamp}_{log_id}.json` naming.
    pub fn log_rel(agent_id: &str, timestamp: &str, log_id: &str) -> String {
        format!("logs/{agent_id}_{timestamp}_{log_id}.json")
    }

    pub fn keyword_bucket_summary_rel(bucket: &str) -> String {
        format!("_index/shards/keywords/{bucket}.summary.json")
    }

    pub fn keyword_detail_rel(bucket: &str, keyword: &str) -> String {
        format!("_index/shards/keywords/{bucket}/{keyword}.json")
    }

    pub fn category_shard_rel(category: &str) -> String {
        format!("_index/shards/categories/{category}.json")
    }

    pub fn topic_shard_rel(shard: usize) -> String {
        format!("_index/shards/topics/shard_{shard:02}.json")
    }

    pub fn index_manifest_rel() -> &'static str {
        "_index/summary.json"
    }

    pub fn bloom_rel() -> &'static str {
        "_index/bloom.json"
    }

    pub fn lock_marker_rel(lock_name: &str) -> String {
        format!("_locks/{lock_name}.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_paths_split_category_and_slug() {
        let id = TopicId::new("python/gil");
        assert_eq!(StorageLayout::topic_body_rel(&id), "topics/python/gil.md");
        assert_eq!(
            StorageLayout::topic_meta_rel(&id),
            "topics/python/gil.meta.json"
        );
    }

    #[test]
    fn uncategorized_topic_falls_back() {
        let id = TopicId::new("standalone");
        assert_eq!(
            StorageLayout::topic_body_rel(&id),
            "topics/uncategorized/standalone.md"
        );
    }

    #[test]
    fn index_paths_nest_under_shards() {
        assert_eq!(StorageLayout::index_manifest_rel(), "_index/summary.json");
        assert_eq!(
            StorageLayout::keyword_bucket_summary_rel("a-e"),
            "_index/shards/keywords/a-e.summary.json"
        );
        assert_eq!(
            StorageLayout::keyword_detail_rel("a-e", "async"),
            "_index/shards/keywords/a-e/async.json"
        );
        assert_eq!(
            StorageLayout::category_shard_rel("python"),
            "_index/shards/categories/python.json"
        );
        assert_eq!(StorageLayout::topic_shard_rel(7), "_index/shards/topics/shard_07.json");
        assert_eq!(StorageLayout::topic_shard_rel(42), "_index/shards/topics/shard_42.json");
    }

    #[test]
    fn citation_and_log_paths_carry_date_and_timestamp() {
        assert_eq!(
            StorageLayout::citation_rel("abcd1234", "2026-07-28"),
            "citations/abcd1234_2026-07-28.json"
        );
        assert_eq!(StorageLayout::citation_glob("abcd1234"), "abcd1234_*.json");
        assert_eq!(
            StorageLayout::log_rel("tester", "20260728_120000", "ef56gh78"),
            "logs/tester_20260728_120000_ef56gh78.json"
        );
    }
}
