//! Positioned reads from a target's address space.

use std::fs::File;
use std::marker::PhantomData;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::attach::{AttachedSession, Pid, Tracer};
use crate::util::PROC_ROOT;

/// A byte-addressable view of a target's address space.
pub trait MemorySource {
    /// Reads up to `buf.len()` bytes starting at the absolute address `addr`.
    ///
    /// Performs a single positioned read. The returned count may be smaller than
    /// `buf.len()`; only the first `n` bytes of `buf` are valid.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the range is unmapped, unreadable, or the target is gone.
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Error opening the memory descriptor of an attached process.
#[derive(Debug, Error)]
#[error("failed to open {}: {source}", path.display())]
pub struct MemoryOpenError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

impl MemoryOpenError {
    /// Path of the descriptor that could not be opened.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The `/proc/<pid>/mem` descriptor of an attached process.
///
/// Borrows the session, so the descriptor is always closed before the debug grant is
/// released.
pub struct ProcessMemory<'s> {
    file: File,
    pid: Pid,
    _session: PhantomData<&'s ()>,
}

impl<'s> ProcessMemory<'s> {
    /// Opens the memory descriptor of the session's target for reading.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryOpenError`] if the descriptor cannot be opened.
    pub fn open<T: Tracer>(session: &'s AttachedSession<T>) -> Result<Self, MemoryOpenError> {
        let path = PathBuf::from(format!("{}/{}/mem", PROC_ROOT, session.pid()));
        let file = File::open(&path).map_err(|source| MemoryOpenError { path, source })?;
        debug!("Opened memory of process {}", session.pid());
        Ok(ProcessMemory {
            file,
            pid: session.pid(),
            _session: PhantomData,
        })
    }

    /// Returns the target process.
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl MemorySource for ProcessMemory<'_> {
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        FileExt::read_at(&self.file, buf, addr)
    }
}

impl<M: MemorySource + ?Sized> MemorySource for &M {
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read_at(addr, buf)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Sparse in-memory address space. Reads outside a mapping fail with `EIO`.
    #[derive(Default)]
    pub(crate) struct MockMemory {
        mappings: BTreeMap<u64, Vec<u8>>,
        /// Cap on bytes returned per read, to simulate partial reads
        pub max_read: Option<usize>,
    }

    impl MockMemory {
        pub fn map(mut self, addr: u64, bytes: &[u8]) -> Self {
            self.mappings.insert(addr, bytes.to_vec());
            self
        }
    }

    impl MemorySource for MockMemory {
        fn read_at(&self, addr: u64, buf: &mut [u8]) -> std::io::Result<usize> {
            let (base, bytes) = self
                .mappings
                .range(..=addr)
                .next_back()
                .filter(|(base, bytes)| addr < **base + bytes.len() as u64)
                .ok_or_else(|| std::io::Error::from_raw_os_error(libc::EIO))?;
            let avail = &bytes[(addr - base) as usize..];
            let n = buf
                .len()
                .min(avail.len())
                .min(self.max_read.unwrap_or(usize::MAX));
            buf[..n].copy_from_slice(&avail[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_mock_reads() {
        let mem = MockMemory::default().map(0x1000, b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(mem.read_at(0x1002, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"cdef");
        assert_eq!(mem.read_at(0x1004, &mut buf).unwrap(), 2);
        assert!(mem.read_at(0x2000, &mut buf).is_err());
    }

    #[test]
    fn test_read_own_memory() -> anyhow::Result<()> {
        // /proc/self/mem is readable without attaching
        let marker = b"memstrings-self-read".to_vec();
        let file = File::open(format!("{}/self/mem", PROC_ROOT))?;
        let mut buf = vec![0u8; marker.len()];
        let n = FileExt::read_at(&file, &mut buf, marker.as_ptr() as u64)?;
        assert_eq!(n, marker.len());
        assert_eq!(buf, marker);
        Ok(())
    }
}
