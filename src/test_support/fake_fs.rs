use crate::domain::Filesystem;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDir {
    pub path: PathBuf,
    pub mode: u32,
}

#[derive(Debug, Clone)]
pub struct FakeFile {
    pub path: PathBuf,
    contents: Arc<Mutex<Vec<u8>>>,
}

impl FakeFile {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.contents)).into_owned()
    }
}

#[derive(Default)]
struct State {
    dirs: Vec<FakeDir>,
    files: Vec<FakeFile>,
}

/// In-memory filesystem recording every directory and file it was asked for.
///
/// Paths are compared by component, so removing `/tmp/a` leaves `/tmp/ab`.
#[derive(Clone, Default)]
pub struct FakeFilesystem(Arc<Mutex<State>>);

impl FakeFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dirs(&self) -> Vec<FakeDir> {
        lock(&self.0).dirs.clone()
    }

    pub fn written_files(&self) -> Vec<FakeFile> {
        lock(&self.0).files.clone()
    }

    /// Contents of the most recent file created at `path`.
    pub fn contents(&self, path: &Path) -> Option<String> {
        lock(&self.0)
            .files
            .iter()
            .rev()
            .find(|file| file.path == path)
            .map(FakeFile::contents)
    }
}

impl Filesystem for FakeFilesystem {
    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        lock(&self.0).dirs.push(FakeDir {
            path: path.to_path_buf(),
            mode,
        });
        Ok(())
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let contents = Arc::new(Mutex::new(Vec::new()));
        lock(&self.0).files.push(FakeFile {
            path: path.to_path_buf(),
            contents: contents.clone(),
        });
        Ok(Box::new(FakeWriter(contents)))
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let mut state = lock(&self.0);
        state.dirs.retain(|dir| !dir.path.starts_with(path));
        state.files.retain(|file| !file.path.starts_with(path));
        Ok(())
    }

    fn temp_dir(&self) -> PathBuf {
        PathBuf::from("/tmp")
    }

    fn exists(&self, path: &Path) -> bool {
        let state = lock(&self.0);
        state.dirs.iter().any(|dir| dir.path.starts_with(path))
            || state.files.iter().any(|file| file.path.starts_with(path))
    }
}

struct FakeWriter(Arc<Mutex<Vec<u8>>>);

impl Write for FakeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
