use crate::domain::Filesystem;
use std::fs::{self, DirBuilder, File};
use std::io::{self, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

/// Filesystem backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl Filesystem for LocalFilesystem {
    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        DirBuilder::new().recursive(true).mode(mode).create(path)
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(File::create(path)?))
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        match fs::symlink_metadata(path) {
            Ok(_) => true,
            Err(e) => e.kind() != io::ErrorKind::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_make_delete_dir() {
        let root = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new();
        let dir = root.path().join("a").join("b");

        fs.create_dir_all(&dir, 0o744).unwrap();
        assert!(fs.exists(&dir));

        fs.remove_all(&dir).unwrap();
        assert!(!fs.exists(&dir));
        // removing twice is fine
        fs.remove_all(&dir).unwrap();
    }

    #[test]
    fn test_dir_mode() {
        let root = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new();
        let dir = root.path().join("mode");

        fs.create_dir_all(&dir, 0o700).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_make_delete_file() {
        let root = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new();
        let dir = root.path().join("a");
        fs.create_dir_all(&dir, 0o744).unwrap();

        let file_path = dir.join("c");
        let mut file = fs.create(&file_path).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        assert_eq!(std::fs::read(&file_path).unwrap(), vec![1, 2, 3]);
        assert!(fs.exists(&file_path));

        fs.remove_all(&dir).unwrap();
        assert!(!fs.exists(&file_path));
    }

    #[test]
    fn test_remove_single_file() {
        let root = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new();
        let file_path = root.path().join("single");
        std::fs::write(&file_path, "x").unwrap();

        fs.remove_all(&file_path).unwrap();
        assert!(!fs.exists(&file_path));
        assert!(fs.exists(root.path()));
    }
}
