use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::layout::StorageLayout;
use crate::storage::object_store::ObjectStore;

/// Contents of a marker file at `_locks/<name>.lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockMarker {
    lock_id: String,
    holder_id: String,
    acquired_at: u64,
    expires_at: u64,
}

/// Named, TTL'd advisory lock over a logical resource path.
/// Acquisition is an atomic create-if-absent write of a marker object, so it
/// works the same way against any `ObjectStore`, not just a POSIX filesystem
/// (unlike `flock`, which only exists on local disks).
pub struct LockManager {
    store: Arc<dyn ObjectStore>,
}

/// RAII handle: dropping it releases the lock synchronously best-effort via
/// a detached task, but callers should prefer `LockGuard::release` to
/// observe failures.
pub struct LockGuard {
    store: Arc<dyn ObjectStore>,
    lock_name: String,
    lock_id: String,
    released: bool,
}

impl LockManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        LockManager { store }
    }

    fn now_secs() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    /// Attempts to acquire `lock_name` for `holder_id`, waiting up to
    /// `wait_ttl` (polling every `poll_interval`) if currently held by
    /// someone else. The lock itself expires after `lock_ttl`.
    pub async fn acquire(
        &self,
        lock_name: &str,
        holder_id: &str,
        lock_ttl: Duration,
        wait_ttl: Duration,
        poll_interval: Duration,
    ) -> Result<LockGuard> {
        let deadline = SystemTime::now() + wait_ttl;

        loop {
            match self.try_acquire_once(lock_name, holder_id, lock_ttl).await {
                Ok(guard) => return Ok(guard),
                Err(e) if e.kind == ErrorKind::LockHeld => {
                    if SystemTime::now() >= deadline {
                        return Err(Error::timeout(format!(
                            "timed out waiting for lock {lock_name}"
                        )));
                    }
                    sleep(poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_acquire_once(
        &self,
        lock_name: &str,
        holder_id: &str,
        lock_ttl: Duration,
    ) -> Result<LockGuard> {
        let path = StorageLayout::lock_marker_rel(lock_name);

        if let Ok((bytes, _)) = self.store.read(&path).await {
            if let Ok(existing) = serde_json::from_slice::<LockMarker>(&bytes) {
                if existing.expires_at > Self::now_secs() {
                    return Err(Error::lock_held(format!(
                        "{lock_name} held by {}",
                        existing.holder_id
                    )));
                }
            }
            // Expired (or unparsable): reap it before reacquiring.
            let _ = self.store.delete(&path).await;
        }

        let lock_id = uuid::Uuid::new_v4().to_string();
        let now = Self::now_secs();
        let marker = LockMarker {
            lock_id: lock_id.clone(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at: now + lock_ttl.as_secs(),
        };
        let body = serde_json::to_vec(&marker)?;

        // create_new is the atomic create-if-absent primitive: if another
        // task won the race to recreate the marker between our read-check
        // above and here, this fails with Conflict instead of clobbering it.
        match self.store.create_new(&path, &body).await {
            Ok(_) => Ok(LockGuard {
                store: self.store.clone(),
                lock_name: lock_name.to_string(),
                lock_id,
                released: false,
            }),
            Err(e) if e.kind == ErrorKind::Conflict => {
                Err(Error::lock_held(format!("{lock_name} was just acquired by another caller")))
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the current holder, if the lock is live (non-expired).
    pub async fn check(&self, lock_name: &str) -> Result<Option<String>> {
        let path = StorageLayout::lock_marker_rel(lock_name);
        match self.store.read(&path).await {
            Ok((bytes, _)) => {
                let marker: LockMarker = serde_json::from_slice(&bytes)?;
                if marker.expires_at > Self::now_secs() {
                    Ok(Some(marker.holder_id))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Removes the marker regardless of holder. Used for operator-driven
    /// recovery from a stuck process.
    pub async fn force_unlock(&self, lock_name: &str) -> Result<()> {
        let path = StorageLayout::lock_marker_rel(lock_name);
        match self.store.delete(&path).await {
            Ok(()) | Err(Error { kind: ErrorKind::NotFound, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Releases `lock_name` if `lock_id` is still the current holder. Used
    /// both by `LockGuard::release` and directly by callers that only have
    /// the lock_id string left (e.g. after a tool-call boundary where the
    /// guard itself wasn't retained).
    pub async fn release(&self, lock_name: &str, lock_id: &str) -> Result<()> {
        let path = StorageLayout::lock_marker_rel(lock_name);
        let (bytes, _) = match self.store.read(&path).await {
            Ok(v) => v,
            Err(e) if e.kind == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let marker: LockMarker = serde_json::from_slice(&bytes)?;
        if marker.lock_id != lock_id {
            return Err(Error::lock_mismatch(format!(
                "lock_id does not match current holder of {lock_name}"
            )));
        }
        self.store.delete(&path).await
    }
}

impl LockGuard {
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// Releases the lock, verifying this guard is still the holder.
    pub async fn release(mut self, manager: &LockManager) -> Result<()> {
        self.released = true;
        manager.release(&self.lock_name, &self.lock_id).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let path = StorageLayout::lock_marker_rel(&self.lock_name);
        let lock_id = self.lock_id.clone();
        tokio::spawn(async move {
            if let Ok((bytes, _)) = store.read(&path).await {
                if let Ok(marker) = serde_json::from_slice::<LockMarker>(&bytes) {
                    if marker.lock_id == lock_id {
                        let _ = store.delete(&path).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object_store::FilesystemObjectStore;

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let mgr = LockManager::new(store);

        let guard = mgr
            .try_acquire_once("rebuild", "writer-a", Duration::from_secs(30))
            .await
            .unwrap();

        let err = mgr
            .try_acquire_once("rebuild", "writer-b", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockHeld);

        guard.release(&mgr).await.unwrap();
        mgr.try_acquire_once("rebuild", "writer-b", Duration::from_secs(30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_lock_is_reaped_and_reacquired() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let mgr = LockManager::new(store);

        let _guard = mgr
            .try_acquire_once("rebuild", "writer-a", Duration::from_secs(0))
            .await
            .unwrap();

        // TTL already elapsed (ttl=0), so a second acquirer should succeed.
        mgr.try_acquire_once("rebuild", "writer-b", Duration::from_secs(30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_with_wrong_lock_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let mgr = LockManager::new(store);

        let _guard = mgr
            .try_acquire_once("rebuild", "writer-a", Duration::from_secs(30))
            .await
            .unwrap();

        let err = mgr.release("rebuild", "not-the-real-id").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockMismatch);
    }

    #[tokio::test]
    async fn concurrent_acquire_has_exactly_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()));
        let mgr = Arc::new(LockManager::new(store));

        let a = mgr.clone();
        let b = mgr.clone();
        let (r1, r2) = tokio::join!(
            a.try_acquire_once("rebuild", "writer-a", Duration::from_secs(30)),
            b.try_acquire_once("rebuild", "writer-b", Duration::from_secs(30)),
        );

        assert_ne!(r1.is_ok(), r2.is_ok());
        let loser = if r1.is_err() { r1 } else { r2 };
        assert_eq!(loser.unwrap_err().kind, ErrorKind::LockHeld);
    }
}
