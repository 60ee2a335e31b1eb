//! The cached file stream: seek/read/write/truncate/flush over a single
//! open file, with a bounded-capacity page cache so that the hash table
//! core's repeated re-reads of the header, journal, and hot lookup slots
//! don't all turn into syscalls.
//!
//! The cache is intentionally simple: a small LRU of exact `(offset, len)`
//! byte ranges bounded by a byte budget (`CacheOptions::cache_size`), rather
//! than page-aligned pages — node reads are already fixed-size and
//! byte-exact (§Node I/O), so range caching avoids the bookkeeping of
//! aligning every read/write to a page boundary for no benefit.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions as FsOpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Page-cache sizing. `cache_size` is a byte budget, not an entry count:
/// entries are evicted oldest-first once the sum of their lengths would
/// exceed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub cache_size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        // Matches the source's default: comfortably holds the header,
        // journal, and a working set of lookup/item nodes without growing
        // unbounded on a large table scan.
        CacheOptions { cache_size: 64 * 1024 }
    }
}

struct CacheEntry {
    offset: u64,
    bytes: Vec<u8>,
}

/// A single-handle, exclusively-owned, read-write (or read-only) cached view
/// over one file.
pub struct CachedFile {
    file: File,
    read_only: bool,
    options: CacheOptions,
    entries: VecDeque<CacheEntry>,
    cached_bytes: usize,
    len: u64,
}

impl CachedFile {
    /// Open an existing file for exclusive read-write access.
    pub fn open(path: &Path, options: CacheOptions) -> io::Result<Self> {
        let file = FsOpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, false, options)
    }

    /// Open an existing file for shared read-only access.
    pub fn open_read_only(path: &Path, options: CacheOptions) -> io::Result<Self> {
        let file = FsOpenOptions::new().read(true).open(path)?;
        Self::from_file(file, true, options)
    }

    /// Create (or truncate) a file for exclusive read-write access.
    pub fn create(path: &Path, options: CacheOptions) -> io::Result<Self> {
        let file = FsOpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(file, false, options)
    }

    fn from_file(mut file: File, read_only: bool, options: CacheOptions) -> io::Result<Self> {
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            read_only,
            options,
            entries: VecDeque::new(),
            cached_bytes: 0,
            len,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn cache_size(&self) -> usize {
        self.options.cache_size
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    #[tracing::instrument(level = "trace", skip(self, buf), fields(len = buf.len()))]
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.offset <= offset && offset + buf.len() as u64 <= e.offset + e.bytes.len() as u64)
        {
            let start = (offset - entry.offset) as usize;
            buf.copy_from_slice(&entry.bytes[start..start + buf.len()]);
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        self.cache_insert(offset, buf.to_vec());
        Ok(())
    }

    /// Write `buf` at `offset`, invalidating any cached ranges it overlaps
    /// and immediately issuing the write to the underlying file (durability
    /// is only guaranteed after an explicit [`CachedFile::flush`], but the
    /// write is visible to subsequent reads through this handle regardless).
    #[tracing::instrument(level = "trace", skip(self, buf), fields(len = buf.len()))]
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file handle is read-only",
            ));
        }

        let end = offset + buf.len() as u64;
        self.invalidate_overlapping(offset, end);

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        if end > self.len {
            self.len = end;
        }
        self.cache_insert(offset, buf.to_vec());
        Ok(())
    }

    /// Truncate (or extend with zeros) the file to exactly `new_len` bytes.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file handle is read-only",
            ));
        }
        self.file.set_len(new_len)?;
        self.len = new_len;
        self.entries.retain(|e| e.offset + e.bytes.len() as u64 <= new_len);
        self.cached_bytes = self.entries.iter().map(|e| e.bytes.len()).sum();
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn invalidate_overlapping(&mut self, start: u64, end: u64) {
        self.entries.retain(|e| {
            let e_end = e.offset + e.bytes.len() as u64;
            let overlaps = e.offset < end && start < e_end;
            !overlaps
        });
        self.cached_bytes = self.entries.iter().map(|e| e.bytes.len()).sum();
    }

    fn cache_insert(&mut self, offset: u64, bytes: Vec<u8>) {
        if bytes.len() > self.options.cache_size {
            return;
        }
        self.cached_bytes += bytes.len();
        self.entries.push_back(CacheEntry { offset, bytes });
        while self.cached_bytes > self.options.cache_size {
            if let Some(evicted) = self.entries.pop_front() {
                self.cached_bytes -= evicted.bytes.len();
            } else {
                break;
            }
        }
    }
}

/// A sequential [`Read`] adapter over a [`CachedFile`] starting at a fixed
/// offset, advancing as bytes are consumed. Used by the map/set façades to
/// decode a key or value with its [`crate::serializer::Codec`] impl directly
/// off the item section, without knowing the encoded length up front (most
/// shapes are self-delimiting: fixed width, or length-prefixed).
pub struct FileCursor<'a> {
    file: &'a mut CachedFile,
    pos: u64,
}

impl<'a> FileCursor<'a> {
    pub fn new(file: &'a mut CachedFile, pos: u64) -> Self {
        Self { file, pos }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<'a> Read for FileCursor<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.file.len().saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.file.read_at(self.pos, &mut buf[..n])?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let mut f = CachedFile::create(&path, CacheOptions::default()).unwrap();
        f.write_at(0, b"hello world").unwrap();
        let mut buf = [0u8; 5];
        f.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn overlapping_write_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let mut f = CachedFile::create(&path, CacheOptions::default()).unwrap();
        f.write_at(0, b"aaaaaaaaaa").unwrap();
        let mut buf = [0u8; 10];
        f.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"aaaaaaaaaa");

        f.write_at(2, b"bb").unwrap();
        f.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"aabbaaaaaa");
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        {
            let mut f = CachedFile::create(&path, CacheOptions::default()).unwrap();
            f.write_at(0, b"x").unwrap();
            f.flush().unwrap();
        }
        let mut f = CachedFile::open_read_only(&path, CacheOptions::default()).unwrap();
        assert!(f.write_at(0, b"y").is_err());
    }

    #[test]
    fn set_len_truncates_and_drops_cache_beyond() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let mut f = CachedFile::create(&path, CacheOptions::default()).unwrap();
        f.write_at(0, b"0123456789").unwrap();
        f.set_len(5).unwrap();
        assert_eq!(f.len(), 5);
        let mut buf = [0u8; 5];
        f.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"01234");
    }

    #[test]
    fn cursor_reads_sequentially_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let mut f = CachedFile::create(&path, CacheOptions::default()).unwrap();
        f.write_at(0, b"0123456789").unwrap();
        let mut cursor = FileCursor::new(&mut f, 3);
        let mut a = [0u8; 2];
        let mut b = [0u8; 2];
        cursor.read_exact(&mut a).unwrap();
        cursor.read_exact(&mut b).unwrap();
        assert_eq!(&a, b"34");
        assert_eq!(&b, b"56");
    }
}
