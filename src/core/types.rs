use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};

/// A topic identifier of the shape `category/slug` (at least one `/`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicId(pub String);

impl TopicId {
    pub fn new(id: impl Into<String>) -> Self {
        TopicId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Characters before the first `/`, or `"uncategorized"` when absent.
    pub fn category(&self) -> &str {
        match self.0.split_once('/') {
            Some((cat, _)) => cat,
            None => "uncategorized",
        }
    }

    pub fn slug(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, slug)) => slug,
            None => self.0.as_str(),
        }
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TopicId {
    fn from(s: &str) -> Self {
        TopicId(s.to_string())
    }
}

impl From<String> for TopicId {
    fn from(s: String) -> Self {
        TopicId(s)
    }
}

/// Structured metadata record stored at `topics/<id>.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub topic_id: TopicId,
    pub title: String,
    pub version: u32,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub last_modified_by: String,
    pub keywords: Vec<String>,
    pub related_topics: Vec<TopicId>,
    pub citations: BTreeSet<String>,
}

impl Metadata {
    /// Deduplicate keywords case-insensitively, first occurrence wins, and
    /// preserve case of the first occurrence.
    pub fn dedup_keywords(keywords: Vec<String>) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for kw in keywords {
            if seen.insert(kw.to_lowercase()) {
                out.push(kw);
            }
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::new(ErrorKind::SchemaError, format!("invalid metadata: {e}")))
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(Error::from)
    }
}

/// Immutable record pinning a source document to the topics it contributed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub citation_id: String,
    pub source_document: String,
    pub processed_at: DateTime<Utc>,
    pub processed_by: String,
    pub contributed_topics: Vec<TopicId>,
    pub summary: String,
}

/// Append-only record of an operation performed against the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub operation: String,
    pub details: serde_json::Value,
}

/// A single topic mutation fed to the incremental updater.
#[derive(Debug, Clone)]
pub struct TopicMutation {
    pub topic_id: TopicId,
    pub title: String,
    pub keywords: Vec<String>,
    pub related_topics: Vec<TopicId>,
}
