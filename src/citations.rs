//! Immutable citation records pinning a source document to the topics it
//! contributed to. Grounded on `tools/kb_tools.py`'s
//! `add_citation`/`get_citation`.

use std::sync::Arc;

use chrono::Utc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Citation, TopicId};
use crate::storage::{ObjectStore, StorageLayout};

pub struct CitationStore {
    store: Arc<dyn ObjectStore>,
}

impl CitationStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        CitationStore { store }
    }

    pub async fn add_citation(
        &self,
        source_document: &str,
        contributed_topics: Vec<TopicId>,
        summary: &str,
        agent_id: &str,
    ) -> Result<Citation> {
        let citation_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let citation = Citation {
            citation_id: citation_id.clone(),
            source_document: source_document.to_string(),
            processed_at: Utc::now(),
            processed_by: agent_id.to_string(),
            contributed_topics,
            summary: summary.to_string(),
        };

        let date = citation.processed_at.format("%Y-%m-%d").to_string();
        let path = StorageLayout::citation_rel(&citation_id, &date);
        let body = serde_json::to_vec_pretty(&citation)?;
        self.store.write(&path, &body, None).await?;
        Ok(citation)
    }

    /// The citation ID alone doesn't name the file; the date it was written
    /// on is part of the path, so this globs for it instead of reading directly.
    pub async fn get_citation(&self, citation_id: &str) -> Result<Citation> {
        let matches = self.store.list("citations", &StorageLayout::citation_glob(citation_id)).await?;
        let path = matches
            .first()
            .ok_or_else(|| Error::not_found(format!("citation not found: {citation_id}")))?;
        let (bytes, _) = self.store.read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.store.list("citations", "*.json").await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FilesystemObjectStore;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let citations = CitationStore::new(store);

        let citation = citations
            .add_citation("docs/intro.pdf", vec![TopicId::new("python/gil")], "covers the GIL", "ingest-agent")
            .await
            .unwrap();

        let fetched = citations.get_citation(&citation.citation_id).await.unwrap();
        assert_eq!(fetched.source_document, "docs/intro.pdf");
        assert_eq!(fetched.contributed_topics, vec![TopicId::new("python/gil")]);
    }

    #[tokio::test]
    async fn get_missing_citation_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let citations = CitationStore::new(store);
        let err = citations.get_citation("missing").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
