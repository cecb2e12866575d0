//! Report persistence.
//!
//! [`ReportStore`] is the seam between the crash manager and durable
//! storage. [`FileReportStore`] is the real implementation: it writes the full
//! report to a temporary sibling file, syncs it, then renames it over the
//! destination, so a reader sees either the previous report or the new one
//! and never a partial write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Storage for the single crash report file.
pub trait ReportStore: Send + Sync
{
    /// Replace whatever is at `path` with `contents`.
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Read the report at `path`.
    fn read(&self, path: &Path) -> io::Result<String>;

    /// `true` if a readable report exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Remove the report at `path`. Removing a missing report succeeds.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Filesystem-backed [`ReportStore`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FileReportStore;

impl FileReportStore
{
    fn temp_path(path: &Path) -> PathBuf
    {
        let name = path.file_name().map_or_else(|| "report".into(), |name| name.to_string_lossy().into_owned());
        path.with_file_name(format!(".{name}.tmp"))
    }
}

impl ReportStore for FileReportStore
{
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = Self::temp_path(path);
        let result = (|| {
            let mut file = File::create(&temp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }

    fn read(&self, path: &Path) -> io::Result<String>
    {
        fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool
    {
        File::open(path)
            .and_then(|file| file.metadata())
            .is_ok_and(|metadata| metadata.is_file())
    }

    fn remove(&self, path: &Path) -> io::Result<()>
    {
        match fs::remove_file(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_write_creates_parent_and_replaces()
    {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/report.txt");
        let store = FileReportStore;

        store.write(&path, "first").expect("first write");
        store.write(&path, "second").expect("second write");

        assert_eq!(store.read(&path).expect("read"), "second");
        assert!(store.exists(&path));
        assert!(!FileReportStore::temp_path(&path).exists());
    }

    #[test]
    fn test_remove_is_idempotent()
    {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.txt");
        let store = FileReportStore;

        store.write(&path, "x").expect("write");
        store.remove(&path).expect("remove");
        assert!(!store.exists(&path));
        store.remove(&path).expect("second remove");
    }

    #[test]
    fn test_directory_is_not_a_report()
    {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!FileReportStore.exists(dir.path()));
    }
}
