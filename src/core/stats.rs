use serde::{Deserialize, Serialize};

/// Snapshot of knowledge-base-wide counters, returned by `get_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseStats {
    pub total_topics: usize,
    pub total_keywords: usize,
    pub total_categories: usize,
    pub total_citations: usize,
    pub total_logs: usize,
    pub categories: Vec<String>,
    pub index_version: String,
    pub last_rebuilt: Option<String>,
}

/// Cache hit/miss counters for an `IndexReader` instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
