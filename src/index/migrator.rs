//! Detects a stale index generation and migrates forward to the current
//! one. Grounded on `scripts/migrate_index_v2.py` and
//! `scripts/migrate_index_v3.py`: both detect the installed version from
//! the summary/manifest file, no-op if already current, and otherwise
//! rebuild from metadata rather than transform shard files in place.
//!
//! Migration carries no write-ahead log: a crash mid-migration just leaves
//! the old index in place (the manifest write is the last step), so a
//! retry either finishes the same rebuild or starts it over; both
//! converge on the same result since rebuild is idempotent.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::core::config::Config;
use crate::core::error::Result;
use crate::index::builder::IndexBuilder;
use crate::index::model::{IndexManifest, INDEX_VERSION};
use crate::storage::{ObjectStore, StorageLayout};

#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: String,
}

/// Legacy v1.0 (monolithic) index files: no manifest, just a flat topics
/// index and a flat inverted index.
const V1_LEGACY_FILES: &[&str] = &["_index/topics_index.json", "_index/inverted_index.json"];
const V1_LEGACY_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyCurrent { version: String },
    NoIndexFound,
    Migrated { from_version: Option<String>, to_version: String, topics: usize },
}

pub struct Migrator {
    store: Arc<dyn ObjectStore>,
    config: Config,
}

impl Migrator {
    pub fn new(store: Arc<dyn ObjectStore>, config: Config) -> Self {
        Migrator { store, config }
    }

    /// Detects the on-disk index generation and migrates it to
    /// [`INDEX_VERSION`] if it isn't already there. Builds a brand-new
    /// index from `topics/*.meta.json` when none exists yet.
    pub async fn migrate(&self) -> Result<MigrationOutcome> {
        let manifest_path = StorageLayout::index_manifest_rel();

        let manifest_version = match self.store.read(manifest_path).await {
            Ok((bytes, _)) => serde_json::from_slice::<VersionProbe>(&bytes).ok().map(|p| p.version),
            Err(_) => None,
        };

        if manifest_version.as_deref() == Some(INDEX_VERSION) {
            info!(version = INDEX_VERSION, "index already current");
            return Ok(MigrationOutcome::AlreadyCurrent { version: INDEX_VERSION.to_string() });
        }

        let detected_version = match manifest_version {
            Some(v) => Some(v),
            None => self.detect_legacy_v1().await?,
        };

        if let Some(ref old_version) = detected_version {
            info!(from = %old_version, to = INDEX_VERSION, "migrating index");
            if old_version == V1_LEGACY_VERSION {
                self.backup_legacy_v1().await?;
            } else {
                self.backup_existing_index(old_version).await?;
            }
        } else {
            info!("no existing index found, building from scratch");
        }

        let builder = IndexBuilder::new(self.store.clone(), &self.config);
        let manifest: IndexManifest = builder.rebuild_full().await?;

        Ok(if detected_version.is_none() {
            MigrationOutcome::NoIndexFound
        } else {
            MigrationOutcome::Migrated {
                from_version: detected_version,
                to_version: manifest.version,
                topics: manifest.total_topics,
            }
        })
    }

    /// A manifest-less index still counts as present if the old flat
    /// v1.0 files are sitting under `_index/`.
    async fn detect_legacy_v1(&self) -> Result<Option<String>> {
        for path in V1_LEGACY_FILES {
            if self.store.exists(path).await? {
                return Ok(Some(V1_LEGACY_VERSION.to_string()));
            }
        }
        Ok(None)
    }

    /// Backs up each v1.0 flat index file in place with a `.v1.backup`
    /// suffix, matching `migrate_index_v2.py::backup_v1_index`.
    async fn backup_legacy_v1(&self) -> Result<()> {
        for path in V1_LEGACY_FILES {
            if let Ok((bytes, _)) = self.store.read(path).await {
                self.store.write(&format!("{path}.v1.backup"), &bytes, None).await?;
                let _ = self.store.delete(path).await;
            }
        }
        Ok(())
    }

    /// Renames every object under `_index/` aside so a rebuild doesn't mix
    /// stale and fresh shard files of different shapes.
    async fn backup_existing_index(&self, old_version: &str) -> Result<()> {
        let paths = self.store.list("_index", "*").await?;
        for path in paths {
            if let Ok((bytes, _)) = self.store.read(&path).await {
                let backup_path = format!("_index_backup_{old_version}/{}", path.trim_start_matches("_index/"));
                self.store.write(&backup_path, &bytes, None).await?;
                let _ = self.store.delete(&path).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FilesystemObjectStore;

    #[tokio::test]
    async fn migrate_with_no_prior_index_builds_one() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let config = Config::new(dir.path());
        let migrator = Migrator::new(store, config);

        let outcome = migrator.migrate().await.unwrap();
        assert_eq!(outcome, MigrationOutcome::NoIndexFound);
    }

    #[tokio::test]
    async fn migrate_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let config = Config::new(dir.path());
        let migrator = Migrator::new(store, config);

        migrator.migrate().await.unwrap();
        let second = migrator.migrate().await.unwrap();
        assert!(matches!(second, MigrationOutcome::AlreadyCurrent { .. }));
    }

    #[tokio::test]
    async fn stale_manifest_version_triggers_backup_and_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        store
            .write(
                StorageLayout::index_manifest_rel(),
                br#"{"version":"2.0.0","index_type":"sharded"}"#,
                None,
            )
            .await
            .unwrap();

        let config = Config::new(dir.path());
        let migrator = Migrator::new(store.clone(), config);
        let outcome = migrator.migrate().await.unwrap();
        assert!(matches!(outcome, MigrationOutcome::Migrated { from_version: Some(ref v), .. } if v == "2.0.0"));

        let backed_up = store.exists("_index_backup_2.0.0/summary.json").await.unwrap();
        assert!(backed_up);
    }

    #[tokio::test]
    async fn legacy_v1_index_is_detected_and_backed_up_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        store
            .write("_index/topics_index.json", br#"{"topics":{}}"#, None)
            .await
            .unwrap();
        store
            .write("_index/inverted_index.json", br#"{"keywords":{}}"#, None)
            .await
            .unwrap();

        let config = Config::new(dir.path());
        let migrator = Migrator::new(store.clone(), config);
        let outcome = migrator.migrate().await.unwrap();
        assert!(matches!(outcome, MigrationOutcome::Migrated { from_version: Some(ref v), .. } if v == "1.0.0"));

        assert!(store.exists("_index/topics_index.json.v1.backup").await.unwrap());
        assert!(store.exists("_index/inverted_index.json.v1.backup").await.unwrap());
        assert!(!store.exists("_index/topics_index.json").await.unwrap());
    }
}
