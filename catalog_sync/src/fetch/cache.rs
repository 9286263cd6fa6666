//! On-disk cache for raw source payloads
//!
//! Stores each payload body next to a JSON sidecar holding its ETag, content
//! hash and fetch time, keyed by source and resource name. Bodies are written
//! to a `.partial` file first and renamed into place, and a body whose hash
//! does not match its sidecar is treated as untrusted and ignored.

use chrono::{DateTime, Utc};
use mtg_common::SourceId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// Sidecar metadata for a cached payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub etag: Option<String>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    pub len: u64,
}

/// A trusted cache hit
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub body: Vec<u8>,
    pub meta: CacheMeta,
}

/// Hex SHA-256 of a payload body
pub fn content_hash(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

/// Persistent payload cache rooted at a directory
pub struct PayloadCache {
    cache_dir: PathBuf,
}

impl PayloadCache {
    /// Create a cache rooted at `cache_dir`, creating the directory if needed
    pub fn new(cache_dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            log::warn!("Failed to create payload cache directory: {}", e);
        } else {
            log::info!("Payload cache directory: {:?}", cache_dir);
        }
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn body_path(&self, source: SourceId, resource: &str) -> PathBuf {
        self.cache_dir.join(source.as_str()).join(resource)
    }

    fn meta_path(&self, source: SourceId, resource: &str) -> PathBuf {
        self.cache_dir
            .join(source.as_str())
            .join(format!("{}.meta.json", resource))
    }

    /// Read a cached payload, returning `None` on a miss or an untrusted entry
    pub fn get(&self, source: SourceId, resource: &str) -> Option<CachedPayload> {
        let meta_json = std::fs::read_to_string(self.meta_path(source, resource)).ok()?;
        let meta: CacheMeta = match serde_json::from_str(&meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                log::warn!("Ignoring unreadable cache metadata for {}/{}: {}", source, resource, e);
                return None;
            }
        };
        let body = std::fs::read(self.body_path(source, resource)).ok()?;

        if content_hash(&body) != meta.content_hash {
            log::warn!(
                "Ignoring cached payload {}/{}: content hash does not match metadata",
                source,
                resource
            );
            return None;
        }

        log::debug!("Payload cache hit for {}/{}", source, resource);
        Some(CachedPayload { body, meta })
    }

    /// Store a payload body and its metadata
    pub fn put(&self, source: SourceId, resource: &str, body: &[u8], meta: &CacheMeta) -> io::Result<()> {
        let body_path = self.body_path(source, resource);
        if let Some(parent) = body_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Drop stale metadata first so a crash mid-write leaves a miss, not a mismatch
        let meta_path = self.meta_path(source, resource);
        match std::fs::remove_file(&meta_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        write_atomic(&body_path, body)?;
        let meta_json = serde_json::to_vec_pretty(meta).map_err(io::Error::other)?;
        write_atomic(&meta_path, &meta_json)?;

        log::debug!("Cached {} bytes for {}/{}", body.len(), source, resource);
        Ok(())
    }

    /// Store a payload, logging instead of failing
    pub fn insert(&self, source: SourceId, resource: &str, body: &[u8], meta: &CacheMeta) {
        if let Err(e) = self.put(source, resource, body, meta) {
            log::warn!("Failed to cache payload for {}/{}: {}", source, resource, e);
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    std::fs::write(&partial, bytes)?;
    std::fs::rename(&partial, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta_for(body: &[u8], etag: Option<&str>) -> CacheMeta {
        CacheMeta {
            etag: etag.map(str::to_string),
            content_hash: content_hash(body),
            fetched_at: Utc::now(),
            len: body.len() as u64,
        }
    }

    #[test]
    fn test_put_and_get_payload() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PayloadCache::new(temp_dir.path());
        let body = br#"{"object":"list","data":[]}"#;

        assert!(cache.get(SourceId::Scryfall, "sets").is_none());

        cache
            .put(SourceId::Scryfall, "sets", body, &meta_for(body, Some("\"abc\"")))
            .unwrap();

        let hit = cache.get(SourceId::Scryfall, "sets").unwrap();
        assert_eq!(hit.body, body.to_vec());
        assert_eq!(hit.meta.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_sources_cached_separately() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PayloadCache::new(temp_dir.path());

        cache.insert(SourceId::Mtgjson, "data.json", b"one", &meta_for(b"one", None));
        cache.insert(SourceId::Vectors, "data.json", b"two", &meta_for(b"two", None));

        assert_eq!(cache.get(SourceId::Mtgjson, "data.json").unwrap().body, b"one");
        assert_eq!(cache.get(SourceId::Vectors, "data.json").unwrap().body, b"two");
    }

    #[test]
    fn test_tampered_body_is_untrusted() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PayloadCache::new(temp_dir.path());
        cache.insert(SourceId::Vectors, "manifest.json", b"full", &meta_for(b"full", None));

        // Simulate a torn write
        std::fs::write(temp_dir.path().join("vectors").join("manifest.json"), b"fu").unwrap();

        assert!(cache.get(SourceId::Vectors, "manifest.json").is_none());
    }

    #[test]
    fn test_leftover_partial_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PayloadCache::new(temp_dir.path());
        let dir = temp_dir.path().join("scryfall");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sets.partial"), b"half a payl").unwrap();

        assert!(cache.get(SourceId::Scryfall, "sets").is_none());
    }
}
