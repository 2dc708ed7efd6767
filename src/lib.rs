pub mod bloom;
pub mod citations;
pub mod core;
pub mod index;
pub mod knowledge_base;
pub mod router;
pub mod storage;
pub mod topic_store;

pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{Citation, LogEntry, Metadata, TopicId};
pub use crate::knowledge_base::{KnowledgeBase, ToolResult};

/*
┌─────────────────────────────────────────────────────────────────────────┐
│                         KNOWBASE ARCHITECTURE                           │
└─────────────────────────────────────────────────────────────────────────┘

  KnowledgeBase (tools surface)
    │
    ├── TopicStore ───────────── CRUD over (body, metadata), ETag concurrency
    │     └── ObjectStore (trait: Filesystem impl, pluggable backends)
    │
    ├── IndexBuilder ─────────── full rebuild (summary, bloom, shards)
    ├── IncrementalUpdater ───── per-mutation shard touch-up
    ├── IndexReader ──────────── cached, bounded-I/O lookups
    ├── Migrator ─────────────── G1 → G2 → G3 online upgrade
    │
    ├── BloomFilter / MultiBloomFilter ── keyword & category membership
    ├── router ───────────────── pure shard-routing functions
    │
    └── LockManager ──────────── named, TTL'd advisory locks over ObjectStore
*/
