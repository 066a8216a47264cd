//! The local file interface consumed (not implemented) by the engines.
//! Engines never call `std::fs` directly; they go through this trait, so
//! an in-memory or virtual filesystem is a drop-in replacement for tests.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Whether a file is being opened for the upload (read) or download
/// (write) side of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// A single open local file, positioned by `seek` and consumed
/// sequentially by the engine that owns it.
pub trait LocalFile: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn seek(&mut self, offset: u64) -> io::Result<()>;
    fn truncate(&mut self, length: u64) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn size(&self) -> io::Result<u64>;
    fn mtime(&self) -> io::Result<SystemTime>;
}

/// A directory-scoped filesystem capability: open files within it, and
/// delete partials on cancel. Separate from `LocalFile` because "which
/// file to open" is a directory-level decision, not a per-file one.
pub trait LocalFileSystem {
    type File: LocalFile;

    /// Opens `path` (relative to this filesystem's root) in `mode`,
    /// creating it if opening for write.
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Self::File>;

    /// Size of an existing file at `path`, if any; used for Zmodem crash
    /// recovery.
    fn existing_size(&self, path: &Path) -> Option<u64>;

    /// Deletes `path` (used when `keepPartial == false`).
    fn delete(&self, path: &Path) -> io::Result<()>;
}

/// `std::fs`-backed filesystem rooted at a directory.
pub struct StdFs {
    root: PathBuf,
}

impl StdFs {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl LocalFileSystem for StdFs {
    type File = std::fs::File;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Self::File> {
        let full = self.resolve(path);
        match mode {
            OpenMode::Read => std::fs::File::open(full),
            OpenMode::Write => std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(full),
        }
    }

    fn existing_size(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(self.resolve(path)).ok().map(|m| m.len())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path))
    }
}

impl LocalFile for std::fs::File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, buf)
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        io::Seek::seek(self, io::SeekFrom::Start(offset))?;
        Ok(())
    }

    fn truncate(&mut self, length: u64) -> io::Result<()> {
        self.set_len(length)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(self)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn mtime(&self) -> io::Result<SystemTime> {
        self.metadata()?.modified()
    }
}

pub mod mem {
    //! An in-memory filesystem, used by the test suite so round-trip,
    //! crash-recovery, and cancel scenarios run without touching disk.

    use super::{LocalFile, LocalFileSystem, OpenMode};
    use std::collections::HashMap;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    #[derive(Default)]
    struct Entry {
        data: Vec<u8>,
        mtime: Option<SystemTime>,
    }

    #[derive(Clone, Default)]
    pub struct MemFs {
        files: Arc<Mutex<HashMap<PathBuf, Entry>>>,
    }

    impl MemFs {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds an existing file, as if from a previous (crashed) transfer.
        pub fn seed(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
            self.files.lock().unwrap().insert(
                path.into(),
                Entry {
                    data,
                    mtime: Some(SystemTime::now()),
                },
            );
        }

        /// Snapshot of a file's current contents, for assertions.
        #[must_use]
        pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(path.as_ref())
                .map(|e| e.data.clone())
        }
    }

    impl LocalFileSystem for MemFs {
        type File = MemFile;

        fn open(&self, path: &Path, mode: OpenMode) -> io::Result<MemFile> {
            let mut files = self.files.lock().unwrap();
            let entry = files.entry(path.to_path_buf()).or_default();
            let data = match mode {
                OpenMode::Read => entry.data.clone(),
                OpenMode::Write => entry.data.clone(),
            };
            Ok(MemFile {
                fs: self.files.clone(),
                path: path.to_path_buf(),
                data,
                pos: 0,
            })
        }

        fn existing_size(&self, path: &Path) -> Option<u64> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|e| e.data.len() as u64)
        }

        fn delete(&self, path: &Path) -> io::Result<()> {
            self.files.lock().unwrap().remove(path);
            Ok(())
        }
    }

    pub struct MemFile {
        fs: Arc<Mutex<HashMap<PathBuf, Entry>>>,
        path: PathBuf,
        data: Vec<u8>,
        pos: usize,
    }

    impl LocalFile for MemFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let available = self.data.len().saturating_sub(self.pos);
            let n = available.min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            let end = self.pos + buf.len();
            if self.data.len() < end {
                self.data.resize(end, 0);
            }
            self.data[self.pos..end].copy_from_slice(buf);
            self.pos = end;
            self.flush()
        }

        fn seek(&mut self, offset: u64) -> io::Result<()> {
            self.pos = offset as usize;
            Ok(())
        }

        fn truncate(&mut self, length: u64) -> io::Result<()> {
            self.data.truncate(length as usize);
            self.flush()
        }

        fn flush(&mut self) -> io::Result<()> {
            let mut files = self.fs.lock().unwrap();
            let entry = files.entry(self.path.clone()).or_default();
            entry.data = self.data.clone();
            entry.mtime = Some(SystemTime::now());
            Ok(())
        }

        fn size(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn mtime(&self) -> io::Result<SystemTime> {
            Ok(self
                .fs
                .lock()
                .unwrap()
                .get(&self.path)
                .and_then(|e| e.mtime)
                .unwrap_or(SystemTime::UNIX_EPOCH))
        }
    }
}
