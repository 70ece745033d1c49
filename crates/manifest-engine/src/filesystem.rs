//! Read-only filesystem abstraction for template trees.
//!
//! `DiskFs` reads from the real filesystem; `MemoryFs` keeps files in a map
//! so rendering can be tested without touching disk.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Read-only view over a template tree
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Disk-backed filesystem
#[derive(Debug, Clone, Default)]
pub struct DiskFs;

impl FileSystem for DiskFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory filesystem keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file; parent directories exist implicitly
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), content.into());
    }

    /// Builder-style `add_file`
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.add_file(path, content);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileSystem for MemoryFs {
    fn exists(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.files.contains_key(&path) || self.is_dir(&path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.files
            .keys()
            .any(|file| file != &path && file.starts_with(&path))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let path = normalize(path);
        self.files.get(&path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
        })
    }
}

/// Lexically resolves `.` and `..` components.
///
/// Template paths are joined from composition entries such as `../base`,
/// so both filesystems see the same canonical spelling.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fs_directories_are_implicit() {
        let fs = MemoryFs::new().with_file("manifests/base/kustomization.yaml", "resources: []");
        assert!(fs.is_dir(Path::new("manifests")));
        assert!(fs.is_dir(Path::new("manifests/base")));
        assert!(!fs.is_dir(Path::new("manifests/base/kustomization.yaml")));
        assert!(fs.exists(Path::new("manifests/base/kustomization.yaml")));
        assert!(!fs.exists(Path::new("manifests/overlay")));
    }

    #[test]
    fn test_memory_fs_normalizes_parent_components() {
        let fs = MemoryFs::new().with_file("manifests/base/pvc.yaml", "kind: PersistentVolumeClaim");
        let content = fs
            .read_to_string(Path::new("manifests/overlay/../base/./pvc.yaml"))
            .expect("file reachable through ..");
        assert_eq!(content, "kind: PersistentVolumeClaim");
    }

    #[test]
    fn test_memory_fs_missing_file_is_not_found() {
        let fs = MemoryFs::new();
        let err = fs.read_to_string(Path::new("nope.yaml")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_disk_fs_reads_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("kustomization.yaml");
        std::fs::write(&file, "resources: []").expect("write");

        let fs = DiskFs;
        assert!(fs.exists(&file));
        assert!(fs.is_dir(dir.path()));
        assert_eq!(fs.read_to_string(&file).expect("read"), "resources: []");
    }
}
