//! Removable-storage collaborator interface
//!
//! The staging subsystem never touches the filesystem directly. Listing,
//! stat and open calls go through [`Storage`] so that "not mounted", "not
//! found" and "failed" stay distinguishable, and so tests can inject faults.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// One directory entry as reported by [`Storage::list_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// File name without directory
    pub name: String,
    /// Full path usable with [`Storage::open`]
    pub path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// File access on removable media
pub trait Storage: Send + Sync {
    /// Whether the medium is currently mounted and accessible
    fn is_mounted(&self) -> bool;

    /// List a directory. `NotFound` means the directory does not exist; any
    /// other error means it could not be read.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>>;

    /// Size of a file in bytes
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Open a file for sequential reading
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// [`Storage`] backed by `std::fs` below a mount point
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create storage rooted at `root`; relative paths resolve below it
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Mount point
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Storage for LocalStorage {
    fn is_mounted(&self) -> bool {
        self.root.is_dir()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let dir = self.resolve(dir);
        let mut entries = Vec::new();

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir,
            });
        }

        Ok(entries)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(self.resolve(path))?.len())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(path))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_storage_resolves_relative_paths() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::create_dir(temp_dir.path().join("fw"))?;
        std::fs::write(temp_dir.path().join("fw/app.bin"), [0xE9, 1, 2])?;

        let storage = LocalStorage::new(temp_dir.path());
        assert!(storage.is_mounted());
        assert_eq!(storage.file_size(Path::new("fw/app.bin"))?, 3);

        let entries = storage.list_dir(Path::new("fw"))?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.first().map(|e| e.name.as_str()), Some("app.bin"));

        let mut buf = Vec::new();
        storage.open(Path::new("fw/app.bin"))?.read_to_end(&mut buf)?;
        assert_eq!(buf, [0xE9, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_local_storage_distinguishes_not_found() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let storage = LocalStorage::new(temp_dir.path());

        let err = storage.list_dir(Path::new("missing")).err();
        assert_eq!(err.map(|e| e.kind()), Some(io::ErrorKind::NotFound));
        Ok(())
    }

    #[test]
    fn test_unmounted_root() {
        let storage = LocalStorage::new("/nonexistent/fwstage/mount");
        assert!(!storage.is_mounted());
    }
}
