//! The knowledge base's public surface, the "tools" an agent calls.
//! Grounded on `tools/kb_tools.py`'s `KnowledgeBaseTools`:
//! every method here has a same-named counterpart there, reworked onto
//! the sharded v3 index instead of two flat JSON files.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::citations::CitationStore;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::stats::KnowledgeBaseStats;
use crate::core::types::{Citation, LogEntry, Metadata, TopicId};
use crate::index::{IncrementalUpdater, IndexBuilder, IndexReader, MigrationOutcome, Migrator};
use crate::storage::{FilesystemObjectStore, LockGuard, LockManager, ObjectStore, StorageLayout};
use crate::topic_store::{Topic, TopicStore};

/// Uniform envelope returned by every tool, mirroring the
/// `{"success": ..., ...}` dicts the tools this crate replaces returned.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ToolResult<T> {
    fn ok(data: T) -> Self {
        ToolResult { success: true, data: Some(data), error: None }
    }

    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => ToolResult { success: false, data: None, error: Some(e.to_string()) },
        }
    }
}

/// A single search hit, as returned by `search_topics`/`search_topics_fulltext`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub topic_id: TopicId,
    pub title: String,
    pub keywords: Vec<String>,
}

/// A related-topic hit, explicit (via `related_topics`) or inferred from
/// shared keywords.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedTopic {
    pub topic_id: TopicId,
    pub title: String,
    pub relation: &'static str,
}

/// Facade composing storage, the topic store, the sharded index, and
/// locking into the operations an ingest or query agent actually calls.
pub struct KnowledgeBase {
    store: Arc<dyn ObjectStore>,
    config: Config,
    topics: TopicStore,
    citations: CitationStore,
    reader: IndexReader,
    updater: IncrementalUpdater,
    locks: LockManager,
}

impl KnowledgeBase {
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(&config.root));
        Ok(KnowledgeBase {
            topics: TopicStore::new(store.clone()),
            citations: CitationStore::new(store.clone()),
            reader: IndexReader::new(store.clone(), &config),
            updater: IncrementalUpdater::new(store.clone(), &config),
            locks: LockManager::new(store.clone()),
            store,
            config,
        })
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, config: Config) -> Self {
        KnowledgeBase {
            topics: TopicStore::new(store.clone()),
            citations: CitationStore::new(store.clone()),
            reader: IndexReader::new(store.clone(), &config),
            updater: IncrementalUpdater::new(store.clone(), &config),
            locks: LockManager::new(store.clone()),
            store,
            config,
        }
    }

    // ---- Topic management -------------------------------------------------

    #[instrument(skip(self))]
    pub async fn read_topic(&self, topic_id: &TopicId) -> ToolResult<Topic> {
        ToolResult::from_result(self.topics.read_topic(topic_id).await)
    }

    #[instrument(skip(self, content, keywords, related_topics, new_citations))]
    #[allow(clippy::too_many_arguments)]
    pub async fn write_topic(
        &self,
        topic_id: &TopicId,
        content: &str,
        title: &str,
        keywords: Vec<String>,
        related_topics: Vec<TopicId>,
        new_citations: Vec<String>,
        expected_etag: Option<&str>,
    ) -> ToolResult<Metadata> {
        ToolResult::from_result(self.write_topic_inner(topic_id, content, title, keywords, related_topics, new_citations, expected_etag).await)
    }

    async fn write_topic_inner(
        &self,
        topic_id: &TopicId,
        content: &str,
        title: &str,
        keywords: Vec<String>,
        related_topics: Vec<TopicId>,
        new_citations: Vec<String>,
        expected_etag: Option<&str>,
    ) -> Result<Metadata> {
        let (metadata, previous) = self
            .topics
            .write_topic(topic_id, content, title, keywords, related_topics, new_citations, expected_etag, &self.config.writer_id)
            .await?;
        self.updater.upsert_topic(&metadata, previous.as_ref()).await?;
        self.reader.invalidate();
        info!(topic_id = %topic_id, version = metadata.version, "topic written");
        Ok(metadata)
    }

    #[instrument(skip(self, additional_content))]
    pub async fn append_to_topic(
        &self,
        topic_id: &TopicId,
        additional_content: &str,
        citation_id: Option<String>,
    ) -> ToolResult<Metadata> {
        let result = async {
            let (metadata, previous) =
                self.topics.append_to_topic(topic_id, additional_content, citation_id, &self.config.writer_id).await?;
            self.updater.upsert_topic(&metadata, previous.as_ref()).await?;
            self.reader.invalidate();
            Ok(metadata)
        }
        .await;
        ToolResult::from_result(result)
    }

    #[instrument(skip(self))]
    pub async fn delete_topic(&self, topic_id: &TopicId) -> ToolResult<()> {
        let result = async {
            let old = self.topics.delete_topic(topic_id).await?;
            self.updater.remove_topic(&old).await?;
            self.reader.invalidate();
            Ok(())
        }
        .await;
        ToolResult::from_result(result)
    }

    // ---- Search and discovery ----------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_topics(&self, category: Option<&str>) -> ToolResult<Vec<SearchHit>> {
        let result = async {
            match category {
                Some(cat) => {
                    let topics = self.reader.category_topics(cat).await?;
                    let hits = self.hits_for(topics.into_values()).await?;
                    Ok(hits)
                }
                None => {
                    let categories = self.reader.all_categories().await?;
                    let mut all = Vec::new();
                    for cat in categories {
                        let topics = self.reader.category_topics(&cat).await?;
                        all.extend(self.hits_for(topics.into_values()).await?);
                    }
                    Ok(all)
                }
            }
        }
        .await;
        ToolResult::from_result(result)
    }

    async fn hits_for(&self, topic_ids: impl IntoIterator<Item = TopicId>) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for topic_id in topic_ids {
            let entry = self.reader.topic_metadata(&topic_id).await?;
            hits.push(SearchHit { topic_id, title: entry.title, keywords: entry.keywords });
        }
        Ok(hits)
    }

    #[instrument(skip(self))]
    pub async fn search_topics(&self, query: &str) -> ToolResult<Vec<SearchHit>> {
        let result = async {
            let topic_ids = self.reader.search_keyword(query).await?;
            self.hits_for(topic_ids).await
        }
        .await;
        ToolResult::from_result(result)
    }

    /// Falls back to a content scan across topic bodies when the keyword
    /// index finds nothing, matching `search_topics_fulltext`'s role as a
    /// slower last resort.
    #[instrument(skip(self))]
    pub async fn search_topics_fulltext(&self, query: &str, limit: Option<usize>) -> ToolResult<Vec<SearchHit>> {
        let result = async {
            let indexed = self.reader.search_keyword(query).await?;
            if !indexed.is_empty() {
                return self.hits_for(indexed).await;
            }

            let matches = self.store.search(query, "topics", "*.md").await?;
            let mut hits = Vec::new();
            let limit = limit.unwrap_or(20);
            for found in matches {
                if hits.len() >= limit {
                    break;
                }
                if let Some(topic_id) = path_to_topic_id(&found.path) {
                    if let Ok(entry) = self.reader.topic_metadata(&topic_id).await {
                        hits.push(SearchHit { topic_id, title: entry.title, keywords: entry.keywords });
                    }
                }
            }
            Ok(hits)
        }
        .await;
        ToolResult::from_result(result)
    }

    #[instrument(skip(self))]
    pub async fn find_related_topics(&self, topic_id: &TopicId) -> ToolResult<Vec<RelatedTopic>> {
        let result = async {
            let source = self.reader.topic_metadata(topic_id).await?;
            let mut related = Vec::new();

            for rel_id in &source.related_topics {
                if let Ok(entry) = self.reader.topic_metadata(rel_id).await {
                    related.push(RelatedTopic { topic_id: rel_id.clone(), title: entry.title, relation: "explicit" });
                }
            }

            let mut similar: BTreeMap<String, ()> = BTreeMap::new();
            for keyword in source.keywords.iter().take(3) {
                for candidate in self.reader.search_keyword(keyword).await? {
                    if candidate.as_str() != topic_id.as_str()
                        && !source.related_topics.iter().any(|r| r.as_str() == candidate.as_str())
                    {
                        similar.insert(candidate.as_str().to_string(), ());
                    }
                }
            }
            for candidate in similar.keys().take(5) {
                let candidate_id = TopicId::new(candidate.clone());
                if let Ok(entry) = self.reader.topic_metadata(&candidate_id).await {
                    related.push(RelatedTopic { topic_id: candidate_id, title: entry.title, relation: "keyword_similarity" });
                }
            }

            Ok(related)
        }
        .await;
        ToolResult::from_result(result)
    }

    // ---- Citations ----------------------------------------------------------

    #[instrument(skip(self, summary))]
    pub async fn add_citation(&self, source_document: &str, contributed_topics: Vec<TopicId>, summary: &str) -> ToolResult<Citation> {
        ToolResult::from_result(self.citations.add_citation(source_document, contributed_topics, summary, &self.config.writer_id).await)
    }

    #[instrument(skip(self))]
    pub async fn get_citation(&self, citation_id: &str) -> ToolResult<Citation> {
        ToolResult::from_result(self.citations.get_citation(citation_id).await)
    }

    // ---- Operation log --------------------------------------------------------

    #[instrument(skip(self, details))]
    pub async fn log_operation(&self, operation: &str, details: serde_json::Value) -> ToolResult<LogEntry> {
        let result = async {
            let entry = LogEntry {
                log_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
                timestamp: chrono::Utc::now(),
                agent_id: self.config.writer_id.clone(),
                operation: operation.to_string(),
                details,
            };
            let timestamp = entry.timestamp.format("%Y%m%d_%H%M%S").to_string();
            let path = StorageLayout::log_rel(&entry.agent_id, &timestamp, &entry.log_id);
            self.store.write(&path, &serde_json::to_vec_pretty(&entry)?, None).await?;
            Ok(entry)
        }
        .await;
        ToolResult::from_result(result)
    }

    /// Most recent log entries first, capped at `limit`.
    #[instrument(skip(self))]
    pub async fn list_logs(&self, limit: usize) -> ToolResult<Vec<LogEntry>> {
        let result = async {
            let paths = self.store.list("logs", "*.json").await?;
            let mut entries = Vec::with_capacity(paths.len());
            for path in paths {
                let (bytes, _) = self.store.read(&path).await?;
                entries.push(serde_json::from_slice::<LogEntry>(&bytes)?);
            }
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            entries.truncate(limit);
            Ok(entries)
        }
        .await;
        ToolResult::from_result(result)
    }

    // ---- Index lifecycle ------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn rebuild_index(&self) -> ToolResult<usize> {
        let result = async {
            let manifest = IndexBuilder::new(self.store.clone(), &self.config).rebuild_full().await?;
            self.reader.invalidate();
            Ok(manifest.total_topics)
        }
        .await;
        ToolResult::from_result(result)
    }

    #[instrument(skip(self))]
    pub async fn migrate_index(&self) -> ToolResult<MigrationOutcome> {
        let result = Migrator::new(self.store.clone(), self.config.clone()).migrate().await;
        self.reader.invalidate();
        ToolResult::from_result(result)
    }

    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> ToolResult<KnowledgeBaseStats> {
        let result = async {
            let mut stats = self.reader.statistics().await?;
            stats.total_citations = self.citations.count().await?;
            stats.total_logs = self.store.list("logs", "*.json").await?.len();
            Ok(stats)
        }
        .await;
        ToolResult::from_result(result)
    }

    // ---- Locking ------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn acquire_lock(&self, lock_name: &str) -> ToolResult<String> {
        let result = self
            .locks
            .acquire(lock_name, &self.config.writer_id, self.config.lock_ttl, self.config.wait_ttl, self.config.lock_poll_interval)
            .await
            .map(|guard| {
                let lock_id = guard.lock_id().to_string();
                std::mem::forget(guard);
                lock_id
            });
        ToolResult::from_result(result)
    }

    /// Releases a lock previously returned by `acquire_lock`. There's no
    /// live `LockGuard` to consume once the lock_id has crossed a tool-call
    /// boundary, so this goes through `LockManager::release` directly.
    #[instrument(skip(self))]
    pub async fn release_lock(&self, lock_name: &str, lock_id: &str) -> ToolResult<()> {
        ToolResult::from_result(self.locks.release(lock_name, lock_id).await)
    }

    #[instrument(skip(self))]
    pub async fn check_lock(&self, lock_name: &str) -> ToolResult<Option<String>> {
        ToolResult::from_result(self.locks.check(lock_name).await)
    }

    #[instrument(skip(self))]
    pub async fn force_unlock(&self, lock_name: &str) -> ToolResult<()> {
        ToolResult::from_result(self.locks.force_unlock(lock_name).await)
    }

    pub async fn acquire_lock_guard(&self, lock_name: &str) -> Result<LockGuard> {
        self.locks
            .acquire(lock_name, &self.config.writer_id, self.config.lock_ttl, self.config.wait_ttl, self.config.lock_poll_interval)
            .await
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }
}

fn path_to_topic_id(path: &str) -> Option<TopicId> {
    let rest = path.strip_prefix("topics/")?.strip_suffix(".md")?;
    Some(TopicId::new(rest))
}
