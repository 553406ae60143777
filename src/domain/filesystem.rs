use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Filesystem operations an environment needs to materialize itself.
pub trait Filesystem: Send + Sync {
    /// Creates `path` and every missing parent with permission bits `mode`.
    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Creates or truncates a file for writing.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Removes a file or a directory tree. A missing path is not an error.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    fn temp_dir(&self) -> PathBuf;

    fn exists(&self, path: &Path) -> bool;
}
