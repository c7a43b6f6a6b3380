//! Asset store: where decoders get their raw bytes from.
//!
//! Sources are referenced by the relative path written in the project
//! document (`"media/intro.mp4"`). Paths are normalized before lookup and
//! may never escape the store root.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::AssetError;

/// Provider of raw media bytes.
pub trait AssetStore: Send + Sync {
    /// Read the full contents of a source.
    fn get_file(&self, source: &str) -> Result<Vec<u8>, AssetError>;

    /// Names of the entries directly inside `path`.
    fn list_directory(&self, path: &str) -> Result<BTreeSet<String>, AssetError>;
}

/// Normalize a source path to `a/b/c` form.
///
/// Leading `./` and `/` are dropped and `.`/`..` segments resolved; a path
/// that climbs above the root is rejected.
pub fn normalize_source(source: &str) -> Result<String, AssetError> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in source.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(AssetError::InvalidPath {
                        path: source.to_owned(),
                        reason: "path escapes the asset root".into(),
                    });
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Filesystem-backed store rooted at a project directory.
#[derive(Clone, Debug)]
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, source: &str) -> Result<PathBuf, AssetError> {
        let normalized = normalize_source(source)?;
        let mut path = self.root.clone();
        for component in Path::new(&normalized).components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        Ok(path)
    }
}

impl AssetStore for DirAssetStore {
    fn get_file(&self, source: &str) -> Result<Vec<u8>, AssetError> {
        let path = self.resolve(source)?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(source, bytes = bytes.len(), "Read asset");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AssetError::NotFound {
                path: source.to_owned(),
            }),
            Err(source) => Err(AssetError::Io { path, source }),
        }
    }

    fn list_directory(&self, path: &str) -> Result<BTreeSet<String>, AssetError> {
        let dir = self.resolve(path)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssetError::NotFound {
                    path: path.to_owned(),
                })
            }
            Err(source) => return Err(AssetError::Io { path: dir, source }),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| AssetError::Io {
                path: dir.clone(),
                source,
            })?;
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

/// In-memory store, used for generated media and in tests.
#[derive(Default)]
pub struct MemoryAssetStore {
    files: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: &str, bytes: Vec<u8>) -> Result<(), AssetError> {
        let key = normalize_source(source)?;
        self.files.write().insert(key, Arc::new(bytes));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl AssetStore for MemoryAssetStore {
    fn get_file(&self, source: &str) -> Result<Vec<u8>, AssetError> {
        let key = normalize_source(source)?;
        self.files
            .read()
            .get(&key)
            .map(|bytes| bytes.as_ref().clone())
            .ok_or_else(|| AssetError::NotFound {
                path: source.to_owned(),
            })
    }

    fn list_directory(&self, path: &str) -> Result<BTreeSet<String>, AssetError> {
        let dir = normalize_source(path)?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let names: BTreeSet<String> = self
            .files
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_owned)
            .collect();
        if names.is_empty() && !dir.is_empty() {
            return Err(AssetError::NotFound {
                path: path.to_owned(),
            });
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── normalization ──

    #[test]
    fn normalize_strips_prefixes_and_dots() {
        assert_eq!(normalize_source("./media/a.mp4").unwrap(), "media/a.mp4");
        assert_eq!(normalize_source("/media//a.mp4").unwrap(), "media/a.mp4");
        assert_eq!(normalize_source("media/x/../a.mp4").unwrap(), "media/a.mp4");
    }

    #[test]
    fn normalize_rejects_escape() {
        let err = normalize_source("../secret.mp4").unwrap_err();
        assert!(matches!(err, AssetError::InvalidPath { .. }));
    }

    // ── memory store ──

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryAssetStore::new();
        store.insert("media/a.mp4", vec![1, 2, 3]).unwrap();
        store.insert("media/sub/b.mp4", vec![4]).unwrap();
        store.insert("title.png", vec![5]).unwrap();

        assert_eq!(store.get_file("./media/a.mp4").unwrap(), vec![1, 2, 3]);
        assert_eq!(store.len(), 3);

        let root: Vec<_> = store.list_directory("").unwrap().into_iter().collect();
        assert_eq!(root, vec!["media", "title.png"]);
        let media: Vec<_> = store.list_directory("media").unwrap().into_iter().collect();
        assert_eq!(media, vec!["a.mp4", "sub"]);
    }

    #[test]
    fn memory_store_missing() {
        let store = MemoryAssetStore::new();
        assert!(matches!(
            store.get_file("nope.mp4"),
            Err(AssetError::NotFound { .. })
        ));
        assert!(matches!(
            store.list_directory("nope"),
            Err(AssetError::NotFound { .. })
        ));
    }

    // ── directory store ──

    #[test]
    fn dir_store_reads_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("media")).unwrap();
        std::fs::write(dir.path().join("media/clip.mp4"), b"bytes").unwrap();

        let store = DirAssetStore::new(dir.path());
        assert_eq!(store.get_file("media/clip.mp4").unwrap(), b"bytes");
        assert!(store.list_directory("media").unwrap().contains("clip.mp4"));
        assert!(matches!(
            store.get_file("media/missing.mp4"),
            Err(AssetError::NotFound { .. })
        ));
    }
}
