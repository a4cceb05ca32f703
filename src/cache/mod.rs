//! Content-addressed artifact cache
//!
//! Entries live at `<root>/<fp[0..2]>/<fp>/` and hold an `artifact/`
//! directory plus `metadata.json`. Entries are assembled under
//! `<root>/tmp/` and renamed into place, so a reader either sees a complete
//! entry or none. Stores of the same fingerprint are serialized; different
//! fingerprints proceed in parallel.

use crate::error::CacheError;
use crate::toolchain::ToolchainInfo;
use crate::util::fs::{atomic_write, copy_dir_all, promote_dir};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA_VERSION: u32 = 1;
pub const METADATA_FILE: &str = "metadata.json";
pub const ARTIFACT_DIR: &str = "artifact";
const TMP_DIR: &str = "tmp";

/// Stored alongside every artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub schema: u32,
    pub fingerprint: String,
    pub kernel_id: String,
    /// Tool name → version used to produce the artifact
    pub toolchain: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl CacheMetadata {
    pub fn new(fingerprint: &str, kernel_id: &str, toolchain: &ToolchainInfo) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            fingerprint: fingerprint.to_string(),
            kernel_id: kernel_id.to_string(),
            toolchain: toolchain.versions(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub artifact_dir: PathBuf,
    pub metadata: CacheMetadata,
}

pub struct ArtifactCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn check_fingerprint(root: &Path, fingerprint: &str) -> Result<(), CacheError> {
    if fingerprint.len() < 2 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CacheError::Metadata {
            path: root.to_path_buf(),
            reason: format!("invalid fingerprint '{fingerprint}'"),
        });
    }
    Ok(())
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, fingerprint: &str) -> PathBuf {
        let shard = fingerprint.get(..2).unwrap_or(fingerprint);
        self.root.join(shard).join(fingerprint)
    }

    fn lock_for(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Finds a complete entry produced with the same tool versions
    pub fn lookup(
        &self,
        fingerprint: &str,
        toolchain: &ToolchainInfo,
    ) -> Result<Option<CacheEntry>, CacheError> {
        check_fingerprint(&self.root, fingerprint)?;
        let dir = self.entry_dir(fingerprint);
        let meta_path = dir.join(METADATA_FILE);

        let data = match fs::read_to_string(&meta_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&meta_path, e)),
        };

        let metadata: CacheMetadata =
            serde_json::from_str(&data).map_err(|e| CacheError::Metadata {
                path: meta_path.clone(),
                reason: e.to_string(),
            })?;

        if metadata.schema != SCHEMA_VERSION || metadata.fingerprint != fingerprint {
            return Err(CacheError::Metadata {
                path: meta_path,
                reason: format!(
                    "entry records schema {} / fingerprint {}",
                    metadata.schema, metadata.fingerprint
                ),
            });
        }

        let artifact_dir = dir.join(ARTIFACT_DIR);
        if !artifact_dir.is_dir() {
            return Err(CacheError::Metadata {
                path: meta_path,
                reason: "artifact directory is missing".to_string(),
            });
        }

        let current = toolchain.versions();
        if metadata.toolchain != current {
            debug!(
                fingerprint,
                cached = ?metadata.toolchain,
                current = ?current,
                "Cache entry built with different toolchain"
            );
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            fingerprint: fingerprint.to_string(),
            artifact_dir,
            metadata,
        }))
    }

    /// Copies `artifact_dir` into the cache, replacing any previous entry
    pub async fn store(
        &self,
        fingerprint: &str,
        artifact_dir: &Path,
        metadata: CacheMetadata,
    ) -> Result<CacheEntry, CacheError> {
        check_fingerprint(&self.root, fingerprint)?;
        let lock = self.lock_for(fingerprint);
        let _guard = lock.lock().await;

        let root = self.root.clone();
        let entry_dir = self.entry_dir(fingerprint);
        let source = artifact_dir.to_path_buf();
        let fp = fingerprint.to_string();
        let meta = metadata.clone();

        tokio::task::spawn_blocking(move || write_entry(&root, &fp, &source, &entry_dir, &meta))
            .await
            .map_err(|e| CacheError::Metadata {
                path: self.root.clone(),
                reason: format!("store task failed: {e}"),
            })??;

        debug!(fingerprint, kernel = %metadata.kernel_id, "Stored cache entry");
        Ok(CacheEntry {
            fingerprint: fingerprint.to_string(),
            artifact_dir: self.entry_dir(fingerprint).join(ARTIFACT_DIR),
            metadata,
        })
    }

    /// Removes every entry; returns how many complete entries were deleted
    pub fn clear(&self) -> Result<usize, CacheError> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for shard in fs::read_dir(&self.root).map_err(|e| CacheError::io(&self.root, e))? {
            let shard = shard.map_err(|e| CacheError::io(&self.root, e))?.path();
            if !shard.is_dir() {
                continue;
            }
            if shard.file_name().is_some_and(|n| n != TMP_DIR) {
                removed += fs::read_dir(&shard)
                    .map_err(|e| CacheError::io(&shard, e))?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().join(METADATA_FILE).is_file())
                    .count();
            }
            fs::remove_dir_all(&shard).map_err(|e| CacheError::io(&shard, e))?;
        }

        info!(root = %self.root.display(), entries = removed, "Cleared artifact cache");
        Ok(removed)
    }
}

fn write_entry(
    root: &Path,
    fingerprint: &str,
    source: &Path,
    entry_dir: &Path,
    metadata: &CacheMetadata,
) -> Result<(), CacheError> {
    let tmp_root = root.join(TMP_DIR);
    fs::create_dir_all(&tmp_root).map_err(|e| CacheError::io(&tmp_root, e))?;
    let staging = tmp_root.join(format!("{}.{}", fingerprint, uuid::Uuid::new_v4().simple()));

    let result = (|| {
        copy_dir_all(source, &staging.join(ARTIFACT_DIR)).map_err(|e| CacheError::io(source, e))?;

        let json = serde_json::to_vec_pretty(metadata).map_err(|e| CacheError::Metadata {
            path: staging.join(METADATA_FILE),
            reason: e.to_string(),
        })?;
        let meta_path = staging.join(METADATA_FILE);
        atomic_write(&meta_path, &json).map_err(|e| CacheError::io(&meta_path, e))?;

        promote_dir(&staging, entry_dir).map_err(|e| CacheError::io(entry_dir, e))
    })();

    if result.is_err() && staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{ResolvedTool, ToolRole};
    use semver::Version;
    use tempfile::TempDir;

    const FP: &str = "ab34cd0000000000000000000000000000000000000000000000000000000000";

    fn toolchain(cmake: &str) -> ToolchainInfo {
        ToolchainInfo::new(
            vec![ResolvedTool {
                name: "cmake".to_string(),
                role: ToolRole::Generator,
                path: PathBuf::from("/usr/bin/cmake"),
                version: Version::parse(cmake).unwrap(),
            }],
            vec![],
        )
    }

    fn artifact(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("artifact-src");
        fs::create_dir_all(path.join("lib")).unwrap();
        fs::write(path.join("lib/libk.a"), content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path().join("cache"));
        let tc = toolchain("3.28.1");
        let src = artifact(tmp.path(), "v1");

        assert!(cache.lookup(FP, &tc).unwrap().is_none());

        let stored = cache
            .store(FP, &src, CacheMetadata::new(FP, "gemm", &tc))
            .await
            .unwrap();
        assert_eq!(
            stored.artifact_dir,
            tmp.path().join("cache").join("ab").join(FP).join("artifact")
        );

        let hit = cache.lookup(FP, &tc).unwrap().unwrap();
        assert_eq!(hit.metadata.kernel_id, "gemm");
        assert_eq!(fs::read_to_string(hit.artifact_dir.join("lib/libk.a")).unwrap(), "v1");

        // Staging area is left empty.
        let tmp_dir = tmp.path().join("cache").join(TMP_DIR);
        assert_eq!(fs::read_dir(tmp_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_toolchain_change_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path().join("cache"));
        let old = toolchain("3.28.1");
        let src = artifact(tmp.path(), "v1");
        cache
            .store(FP, &src, CacheMetadata::new(FP, "gemm", &old))
            .await
            .unwrap();

        assert!(cache.lookup(FP, &toolchain("3.29.0")).unwrap().is_none());
        assert!(cache.lookup(FP, &old).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path().join("cache"));
        let tc = toolchain("3.28.1");

        let first = tmp.path().join("first");
        fs::create_dir_all(&first).unwrap();
        fs::write(first.join("old.a"), "1").unwrap();
        cache.store(FP, &first, CacheMetadata::new(FP, "k", &tc)).await.unwrap();

        let second = tmp.path().join("second");
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("new.a"), "2").unwrap();
        cache.store(FP, &second, CacheMetadata::new(FP, "k", &tc)).await.unwrap();

        let hit = cache.lookup(FP, &tc).unwrap().unwrap();
        assert!(hit.artifact_dir.join("new.a").exists());
        assert!(!hit.artifact_dir.join("old.a").exists());
    }

    #[tokio::test]
    async fn test_concurrent_stores_same_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(ArtifactCache::new(tmp.path().join("cache")));
        let tc = toolchain("3.28.1");
        let src = artifact(tmp.path(), "same");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let src = src.clone();
            let meta = CacheMetadata::new(FP, "k", &tc);
            handles.push(tokio::spawn(async move { cache.store(FP, &src, meta).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let hit = cache.lookup(FP, &tc).unwrap().unwrap();
        assert_eq!(fs::read_to_string(hit.artifact_dir.join("lib/libk.a")).unwrap(), "same");
    }

    #[test]
    fn test_incomplete_entry_is_invisible() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        // An artifact directory without metadata is not an entry.
        fs::create_dir_all(cache.entry_dir(FP).join(ARTIFACT_DIR)).unwrap();
        assert!(cache.lookup(FP, &toolchain("3.28.1")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_metadata_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        let dir = cache.entry_dir(FP);
        fs::create_dir_all(dir.join(ARTIFACT_DIR)).unwrap();
        fs::write(dir.join(METADATA_FILE), "{ not json").unwrap();

        let err = cache.lookup(FP, &toolchain("3.28.1")).unwrap_err();
        assert!(matches!(err, CacheError::Metadata { .. }));
    }

    #[test]
    fn test_rejects_non_hex_fingerprint() {
        let cache = ArtifactCache::new("/tmp/unused");
        assert!(cache.lookup("../../etc", &toolchain("3.28.1")).is_err());
    }

    #[tokio::test]
    async fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path().join("cache"));
        let tc = toolchain("3.28.1");
        let src = artifact(tmp.path(), "v1");
        cache.store(FP, &src, CacheMetadata::new(FP, "k", &tc)).await.unwrap();

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.lookup(FP, &tc).unwrap().is_none());
        assert_eq!(ArtifactCache::new(tmp.path().join("absent")).clear().unwrap(), 0);
    }
}
