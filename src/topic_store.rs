//! Topic body/metadata storage. Grounded on
//! `tools/kb_tools.py`'s `read_topic`/`write_topic`/`append_to_topic`/
//! `delete_topic`, minus the index maintenance, which is the
//! `IncrementalUpdater`'s job, composed in by `KnowledgeBase`.

use std::sync::Arc;

use chrono::Utc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Metadata, TopicId};
use crate::storage::{ObjectStore, StorageLayout};

/// A topic read back from storage: its markdown body plus metadata.
#[derive(Debug, Clone)]
pub struct Topic {
    pub content: String,
    pub etag: String,
    pub metadata: Metadata,
}

pub struct TopicStore {
    store: Arc<dyn ObjectStore>,
}

impl TopicStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        TopicStore { store }
    }

    pub async fn read_topic(&self, topic_id: &TopicId) -> Result<Topic> {
        let body_path = StorageLayout::topic_body_rel(topic_id);
        let meta_path = StorageLayout::topic_meta_rel(topic_id);

        let (content_res, meta_res) = tokio::join!(self.store.read(&body_path), self.store.read(&meta_path));
        let (content_bytes, etag) = content_res?;
        let content = String::from_utf8(content_bytes)
            .map_err(|e| Error::new(ErrorKind::SchemaError, format!("topic body is not utf-8: {e}")))?;

        let metadata = match meta_res {
            Ok((bytes, _)) => Metadata::parse(&bytes)?,
            Err(e) if e.kind == ErrorKind::NotFound => {
                return Err(Error::not_found(format!("metadata missing for {topic_id}")))
            }
            Err(e) => return Err(e),
        };

        Ok(Topic { content, etag, metadata })
    }

    pub async fn previous_metadata(&self, topic_id: &TopicId) -> Result<Option<Metadata>> {
        let meta_path = StorageLayout::topic_meta_rel(topic_id);
        match self.store.read(&meta_path).await {
            Ok((bytes, _)) => Ok(Some(Metadata::parse(&bytes)?)),
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes a topic's content and metadata. Returns the new metadata and
    /// whatever metadata preceded it (`None` for a brand-new topic), so
    /// the caller can feed both into `IncrementalUpdater::upsert_topic`.
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
        writer_id: &str,
    ) -> Result<(Metadata, Option<Metadata>)> {
        let body_path = StorageLayout::topic_body_rel(topic_id);
        let meta_path = StorageLayout::topic_meta_rel(topic_id);

        let previous = self.previous_metadata(topic_id).await?;

        let content_etag = self.store.write(&body_path, content.as_bytes(), expected_etag).await?;

        let version = previous.as_ref().map(|p| p.version + 1).unwrap_or(1);
        let mut citations: std::collections::BTreeSet<String> =
            previous.as_ref().map(|p| p.citations.clone()).unwrap_or_default();
        citations.extend(new_citations);

        let metadata = Metadata {
            topic_id: topic_id.clone(),
            title: title.to_string(),
            version,
            etag: content_etag,
            last_modified: Utc::now(),
            last_modified_by: writer_id.to_string(),
            keywords: Metadata::dedup_keywords(keywords),
            related_topics,
            citations,
        };

        self.store.write(&meta_path, &metadata.to_json_pretty()?, None).await?;

        Ok((metadata, previous))
    }

    pub async fn append_to_topic(
        &self,
        topic_id: &TopicId,
        additional_content: &str,
        citation_id: Option<String>,
        writer_id: &str,
    ) -> Result<(Metadata, Option<Metadata>)> {
        let existing = self.read_topic(topic_id).await?;
        let new_content = format!("{}\n\n{}", existing.content, additional_content);

        self.write_topic(
            topic_id,
            &new_content,
            &existing.metadata.title,
            existing.metadata.keywords.clone(),
            existing.metadata.related_topics.clone(),
            citation_id.into_iter().collect(),
            Some(&existing.etag),
            writer_id,
        )
        .await
    }

    /// Deletes a topic's body and metadata. Returns the metadata that
    /// existed before deletion, for index cleanup.
    pub async fn delete_topic(&self, topic_id: &TopicId) -> Result<Metadata> {
        let meta_path = StorageLayout::topic_meta_rel(topic_id);
        let body_path = StorageLayout::topic_body_rel(topic_id);

        let metadata = match self.store.read(&meta_path).await {
            Ok((bytes, _)) => Metadata::parse(&bytes)?,
            Err(e) if e.kind == ErrorKind::NotFound => {
                return Err(Error::not_found(format!("topic not found: {topic_id}")))
            }
            Err(e) => return Err(e),
        };

        self.store.delete(&body_path).await?;
        let _ = self.store.delete(&meta_path).await;

        Ok(metadata)
    }
}
