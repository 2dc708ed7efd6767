use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::{Error, ErrorKind, Result};

/// Metadata about a stored object, returned alongside reads.
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub path: String,
    pub size: u64,
    pub etag: String,
}

/// One matching line within a file found by `ObjectStore::search`.
#[derive(Debug, Clone)]
pub struct SearchExcerpt {
    pub line_number: usize,
    pub content: String,
}

/// A file with at least one matching line, and up to five excerpts.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub path: String,
    pub excerpts: Vec<SearchExcerpt>,
}

/// Backend-agnostic storage primitive. `FilesystemObjectStore`
/// is the only implementation today; the trait exists so a blob-storage
/// backend can be swapped in without touching callers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<(Vec<u8>, String)>;

    /// Writes `content` at `path`. If `expected_etag` is `Some` and the
    /// object exists with a different etag, returns `ErrorKind::Conflict`
    /// with `fresh_etag` set to the object's current etag.
    async fn write(&self, path: &str, content: &[u8], expected_etag: Option<&str>) -> Result<String>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Atomically creates `path` with `content` only if nothing exists
    /// there yet. Returns `ErrorKind::Conflict` if the path is already
    /// occupied. Unlike `write(path, content, None)`, which unconditionally
    /// overwrites, this never clobbers a concurrent creator.
    async fn create_new(&self, path: &str, content: &[u8]) -> Result<String>;

    /// Lists files under `prefix` whose basename matches the glob `pattern`
    /// (`*` and `?` only), relative to the store root, sorted.
    async fn list(&self, prefix: &str, pattern: &str) -> Result<Vec<String>>;

    /// Linear-scans every file under `prefix` matching `pattern` for
    /// case-insensitive occurrences of `text`, returning up to five
    /// matching-line excerpts per file.
    async fn search(&self, text: &str, prefix: &str, pattern: &str) -> Result<Vec<SearchMatch>>;

    async fn metadata(&self, path: &str) -> Result<ObjectMetadata>;
}

/// Filesystem-backed `ObjectStore`. Uses file mtime plus a short content
/// hash as the ETag, the same optimistic-concurrency scheme as the original
/// storage backend this crate replaces.
pub struct FilesystemObjectStore {
    base_path: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        FilesystemObjectStore { base_path: base_path.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }

    fn compute_etag(full_path: &Path, content: &[u8]) -> Result<String> {
        let meta = std::fs::metadata(full_path)?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?
            .as_secs();
        let digest = md5::compute(content);
        let short = format!("{digest:x}");
        Ok(format!("{mtime}-{}", &short[..8]))
    }

    fn read_etag(&self, path: &str) -> Result<String> {
        let full = self.full_path(path);
        let content = std::fs::read(&full)?;
        Self::compute_etag(&full, &content)
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn read(&self, path: &str) -> Result<(Vec<u8>, String)> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Err(Error::not_found(format!("file not found: {path}")));
        }
        let content = tokio::fs::read(&full).await?;
        let etag = Self::compute_etag(&full, &content)?;
        Ok((content, etag))
    }

    async fn write(&self, path: &str, content: &[u8], expected_etag: Option<&str>) -> Result<String> {
        let full = self.full_path(path);

        if let Some(expected) = expected_etag {
            if full.is_file() {
                let current = self.read_etag(path)?;
                if current != expected {
                    return Err(Error::conflict(
                        format!("etag mismatch writing {path}"),
                        current,
                    ));
                }
            } else {
                return Err(Error::conflict(
                    format!("expected existing object at {path}, found none"),
                    "",
                ));
            }
        }

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Self::compute_etag(&full, content)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Err(Error::not_found(format!("file not found: {path}")));
        }
        tokio::fs::remove_file(&full).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.full_path(path).is_file())
    }

    async fn create_new(&self, path: &str, content: &[u8]) -> Result<String> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let full_for_blocking = full.clone();
        let content_owned = content.to_vec();
        let write_result = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&full_for_blocking)
                .and_then(|mut f| f.write_all(&content_owned))
        })
        .await
        .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?;

        match write_result {
            Ok(()) => Self::compute_etag(&full, content),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let current = self.read_etag(path).unwrap_or_default();
                Err(Error::conflict(format!("{path} already exists"), current))
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn list(&self, prefix: &str, pattern: &str) -> Result<Vec<String>> {
        let search_root = if prefix.is_empty() {
            self.base_path.clone()
        } else {
            self.full_path(prefix)
        };

        if !search_root.exists() {
            return Ok(Vec::new());
        }

        let base_path = self.base_path.clone();
        let pattern = pattern.to_string();
        let files = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut out = Vec::new();
            walk(&search_root, &pattern, &base_path, &mut out)?;
            out.sort();
            Ok(out)
        })
        .await
        .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))??;

        Ok(files)
    }

    async fn search(&self, text: &str, prefix: &str, pattern: &str) -> Result<Vec<SearchMatch>> {
        let paths = self.list(prefix, pattern).await?;
        let needle = text.to_lowercase();

        let mut matches = Vec::new();
        for path in paths {
            let (bytes, _) = match self.read(&path).await {
                Ok(v) => v,
                Err(_) => continue,
            };
            let content = String::from_utf8_lossy(&bytes);
            if !content.to_lowercase().contains(&needle) {
                continue;
            }

            let mut excerpts = Vec::new();
            for (i, line) in content.split('\n').enumerate() {
                if line.to_lowercase().contains(&needle) {
                    let trimmed = line.trim();
                    let content: String = trimmed.chars().take(200).collect();
                    excerpts.push(SearchExcerpt { line_number: i + 1, content });
                    if excerpts.len() >= 5 {
                        break;
                    }
                }
            }
            matches.push(SearchMatch { path, excerpts });
        }

        Ok(matches)
    }

    async fn metadata(&self, path: &str) -> Result<ObjectMetadata> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Err(Error::not_found(format!("file not found: {path}")));
        }
        let meta = tokio::fs::metadata(&full).await?;
        let content = tokio::fs::read(&full).await?;
        let etag = Self::compute_etag(&full, &content)?;
        Ok(ObjectMetadata { path: path.to_string(), size: meta.len(), etag })
    }
}

fn walk(dir: &Path, pattern: &str, base: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, pattern, base, out)?;
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if glob_match(pattern, name) {
                let rel = path.strip_prefix(base).unwrap_or(&path);
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

/// Minimal glob matcher supporting `*` and `?` only, case-sensitive.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            glob_match_inner(&p[1..], t) || (!t.is_empty() && glob_match_inner(p, &t[1..]))
        }
        Some('?') => !t.is_empty() && glob_match_inner(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && glob_match_inner(&p[1..], &t[1..]),
    }
}
