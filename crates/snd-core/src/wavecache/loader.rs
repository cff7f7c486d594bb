//! Byte sources behind the wave cache
//!
//! The cache never opens files itself. It asks a [`WaveLoader`] for byte
//! ranges from a background thread, so any storage works: the filesystem,
//! an archive, or memory in tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{SoundError, SoundResult};

/// Random-access byte supplier
///
/// Called from loader threads and from metadata rebuilds. May block.
pub trait WaveLoader: Send + Sync {
    /// Read up to `len` bytes at `offset`; short only at end of file
    fn read(&self, name: &str, offset: u64, len: usize) -> SoundResult<Vec<u8>>;

    /// Total size of the named file
    fn size(&self, name: &str) -> SoundResult<u64>;
}

/// Loads files relative to a root directory
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Map a sound name to a path under the root
    ///
    /// Names are relative and may not climb out of the root.
    pub fn resolve(&self, name: &str) -> SoundResult<PathBuf> {
        if name.is_empty() {
            return Err(SoundError::CannotResolveName);
        }
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(SoundError::CannotResolveName);
        }
        Ok(self.root.join(relative))
    }

    fn open(&self, name: &str) -> SoundResult<File> {
        let path = self.resolve(name)?;
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                SoundError::FileNotFound
            } else {
                log::warn!("[LOADER] cannot open {:?}: {}", path, e);
                SoundError::SourceNotSetUp
            }
        })
    }
}

impl WaveLoader for FsLoader {
    fn read(&self, name: &str, offset: u64, len: usize) -> SoundResult<Vec<u8>> {
        let mut file = self.open(name)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| SoundError::SourceNotSetUp)?;
        let mut bytes = Vec::with_capacity(len);
        file.take(len as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| {
                log::warn!("[LOADER] read failed for {}: {}", name, e);
                SoundError::SourceNotSetUp
            })?;
        Ok(bytes)
    }

    fn size(&self, name: &str) -> SoundResult<u64> {
        let file = self.open(name)?;
        file.metadata()
            .map(|m| m.len())
            .map_err(|_| SoundError::SourceNotSetUp)
    }
}

/// Files held in memory
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(name.to_string(), Arc::new(bytes));
        }
    }

    fn get(&self, name: &str) -> SoundResult<Arc<Vec<u8>>> {
        if name.is_empty() {
            return Err(SoundError::CannotResolveName);
        }
        let files = self.files.read().map_err(|_| SoundError::SourceNotSetUp)?;
        files.get(name).cloned().ok_or(SoundError::FileNotFound)
    }
}

impl WaveLoader for MemoryLoader {
    fn read(&self, name: &str, offset: u64, len: usize) -> SoundResult<Vec<u8>> {
        let file = self.get(name)?;
        let start = (offset as usize).min(file.len());
        let end = start.saturating_add(len).min(file.len());
        Ok(file[start..end].to_vec())
    }

    fn size(&self, name: &str) -> SoundResult<u64> {
        Ok(self.get(name)?.len() as u64)
    }
}

/// `Read + Seek` view of one loader file, for header parsing
pub struct LoaderReader<'a> {
    loader: &'a dyn WaveLoader,
    name: &'a str,
    pos: u64,
    size: u64,
}

impl<'a> LoaderReader<'a> {
    pub fn new(loader: &'a dyn WaveLoader, name: &'a str) -> SoundResult<Self> {
        let size = loader.size(name)?;
        Ok(Self {
            loader,
            name,
            pos: 0,
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for LoaderReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let bytes = self
            .loader
            .read(self.name, self.pos, buf.len())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        self.pos += bytes.len() as u64;
        Ok(bytes.len())
    }
}

impl Seek for LoaderReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::End(d) => self.size as i128 + d as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Loader that holds reads until the test releases them

    use super::*;
    use std::sync::{Condvar, Mutex};

    struct GateState {
        permits: Mutex<usize>,
        wake: Condvar,
    }

    /// Test-side handle; dropping it opens the gate for good
    pub struct Gate {
        state: Arc<GateState>,
    }

    impl Gate {
        pub fn release(&self, reads: usize) {
            if let Ok(mut permits) = self.state.permits.lock() {
                *permits = permits.saturating_add(reads);
            }
            self.state.wake.notify_all();
        }
    }

    impl Drop for Gate {
        fn drop(&mut self) {
            self.release(usize::MAX);
        }
    }

    pub struct GatedLoader {
        inner: MemoryLoader,
        state: Arc<GateState>,
    }

    impl GatedLoader {
        pub fn new(inner: MemoryLoader) -> (Self, Gate) {
            let state = Arc::new(GateState {
                permits: Mutex::new(0),
                wake: Condvar::new(),
            });
            let gate = Gate {
                state: Arc::clone(&state),
            };
            (Self { inner, state }, gate)
        }
    }

    impl WaveLoader for GatedLoader {
        fn read(&self, name: &str, offset: u64, len: usize) -> SoundResult<Vec<u8>> {
            let mut permits = self.state.permits.lock().map_err(|_| SoundError::Skipped)?;
            while *permits == 0 {
                permits = self.state.wake.wait(permits).map_err(|_| SoundError::Skipped)?;
            }
            *permits -= 1;
            drop(permits);
            self.inner.read(name, offset, len)
        }

        fn size(&self, name: &str) -> SoundResult<u64> {
            self.inner.size(name)
        }
    }
}
