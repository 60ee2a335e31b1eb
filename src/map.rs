//! `FileMap<K, V>`: the file-backed dictionary façade. Everything here is
//! about bridging `K`/`V` to the byte/offset-level [`Core`] engine — hashing
//! and comparing keys through their [`Codec`] encoding, and laying out each
//! item's payload as the key's bytes immediately followed by the value's.

use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hash;
use crate::node;
use crate::options::OpenOptions;
use crate::serializer::Codec;
use crate::stream::FileCursor;
use crate::table::{Core, FindOutcome, Mode};

pub struct FileMap<K, V> {
    core: Core,
    _marker: PhantomData<(K, V)>,
}

impl<K: Codec + Eq, V: Codec> FileMap<K, V> {
    /// Open (creating if absent) with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    /// Open for shared, read-only access; fails if the file doesn't exist or
    /// carries a dirty journal.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenOptions::default().read_only(true).create(false))
    }

    pub fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let args = options.into_args(path.as_ref().to_path_buf(), Mode::Map);
        let core = Core::open(args)?;
        Ok(FileMap {
            core,
            _marker: PhantomData,
        })
    }

    /// Flush and drop the underlying handle.
    pub fn close(mut self) -> Result<()> {
        self.core.file_mut().flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.core.path()
    }

    pub fn is_read_only(&self) -> bool {
        self.core.is_read_only()
    }

    pub fn cache_size(&self) -> usize {
        self.core.cache_size()
    }

    pub fn len(&self) -> i64 {
        self.core.count()
    }

    pub fn is_empty(&self) -> bool {
        self.core.count() == 0
    }

    pub fn fragmentation_count(&self) -> u64 {
        self.core.fragmentation_count()
    }

    pub fn signature(&self) -> [u8; 16] {
        self.core.signature()
    }

    pub fn set_signature(&mut self, signature: [u8; 16]) -> Result<()> {
        self.core.set_signature(signature)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub fn compact(&mut self) -> Result<()> {
        self.core.compact()?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub fn clear(&mut self) -> Result<()> {
        self.core.clear()?;
        Ok(())
    }

    fn encode_key(key: &K) -> Result<(i32, Vec<u8>)> {
        let bytes = key.to_bytes()?;
        Ok((hash::hash_code(&bytes), bytes))
    }

    fn find_by_key(&mut self, key: &K) -> Result<FindOutcome> {
        let (hash_code, _) = Self::encode_key(key)?;
        let outcome = self.core.find(hash_code, |file, item_offset| {
            let mut cursor = FileCursor::new(file, (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64);
            let candidate = K::read_from(&mut cursor)?;
            Ok(candidate == *key)
        })?;
        Ok(outcome)
    }

    fn read_value_at(&mut self, item_offset: i64) -> Result<V> {
        let mut cursor = FileCursor::new(
            self.core.file_mut(),
            (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64,
        );
        let _key = K::read_from(&mut cursor)?;
        let value = V::read_from(&mut cursor)?;
        Ok(value)
    }

    pub fn contains_key(&mut self, key: &K) -> Result<bool> {
        Ok(self.find_by_key(key)?.found())
    }

    pub fn get(&mut self, key: &K) -> Result<Option<V>> {
        let outcome = self.find_by_key(key)?;
        if !outcome.found() {
            return Ok(None);
        }
        Ok(Some(self.read_value_at(outcome.item_pointer)?))
    }

    pub fn get_or_err(&mut self, key: &K) -> Result<V> {
        self.get(key)?.ok_or(Error::KeyNotFound)
    }

    /// §4.5 indexer assignment: insert or overwrite, returning the previous
    /// value if this was an overwrite.
    #[tracing::instrument(level = "debug", skip(self, key, value))]
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (hash_code, key_bytes) = Self::encode_key(&key)?;
        let mut outcome = self.find_by_key(&key)?;
        let is_new = !outcome.found();
        let previous = if is_new {
            None
        } else {
            Some(self.read_value_at(outcome.item_pointer)?)
        };

        if is_new && self.core.grow_if_needed()? {
            outcome = self.find_by_key(&key)?;
        }

        let mut payload = key_bytes;
        value.write_to(&mut payload)?;
        let item_offset = self.core.append_item(outcome.lookup_pointer, hash_code, &payload)?;
        self.core.commit_set(outcome.lookup_pointer, item_offset, is_new)?;
        Ok(previous)
    }

    /// §4.5 `try_insert`: fails with [`Error::DuplicateKey`] if the key is
    /// already present, rather than overwriting.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (hash_code, key_bytes) = Self::encode_key(&key)?;
        let mut outcome = self.find_by_key(&key)?;
        if outcome.found() {
            return Err(Error::DuplicateKey);
        }

        if self.core.grow_if_needed()? {
            outcome = self.find_by_key(&key)?;
        }

        let mut payload = key_bytes;
        value.write_to(&mut payload)?;
        let item_offset = self.core.append_item(outcome.lookup_pointer, hash_code, &payload)?;
        self.core.commit_set(outcome.lookup_pointer, item_offset, true)
            .map_err(Error::from)
    }

    /// §4.5 `try_insert_or_ignore`: like [`FileMap::try_insert`] but reports
    /// the outcome as a bool instead of an error.
    pub fn try_insert_or_ignore(&mut self, key: K, value: V) -> Result<bool> {
        match self.try_insert(key, value) {
            Ok(()) => Ok(true),
            Err(Error::DuplicateKey) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let outcome = self.find_by_key(key)?;
        if !outcome.found() {
            return Ok(None);
        }
        let value = self.read_value_at(outcome.item_pointer)?;
        self.core.commit_delete(outcome.lookup_pointer)?;
        Ok(Some(value))
    }

    /// Streams every live `(key, value)` pair directly off the item section,
    /// without materializing the whole table in memory.
    pub fn iter(&mut self) -> Iter<'_, K, V> {
        let offset = self.core.item_section_start();
        Iter {
            core: &mut self.core,
            offset,
            _marker: PhantomData,
        }
    }

    pub fn keys(&mut self) -> impl Iterator<Item = io::Result<K>> + '_ {
        self.iter().map(|r| r.map(|(k, _)| k))
    }
}

pub struct Iter<'a, K, V> {
    core: &'a mut Core,
    offset: i64,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Codec, V: Codec> Iterator for Iter<'a, K, V> {
    type Item = io::Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.core.next_live_item(self.offset) {
            Ok(Some((item_offset, header))) => {
                self.offset = header.next_item_pointer;
                let mut cursor = FileCursor::new(
                    self.core.file_mut(),
                    (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64,
                );
                let decoded = (|| -> io::Result<(K, V)> {
                    let key = K::read_from(&mut cursor)?;
                    let value = V::read_from(&mut cursor)?;
                    Ok((key, value))
                })();
                Some(decoded)
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut map: FileMap<i32, String> = FileMap::open(dir.path().join("m.bin")).unwrap();

        assert_eq!(map.insert(1, "one".to_string()).unwrap(), None);
        assert_eq!(map.insert(2, "two".to_string()).unwrap(), None);
        assert_eq!(map.get(&1).unwrap(), Some("one".to_string()));
        assert_eq!(map.len(), 2);

        assert_eq!(map.insert(1, "uno".to_string()).unwrap(), Some("one".to_string()));
        assert_eq!(map.get(&1).unwrap(), Some("uno".to_string()));
        assert_eq!(map.len(), 2);
        assert_eq!(map.fragmentation_count(), 1);

        assert_eq!(map.remove(&2).unwrap(), Some("two".to_string()));
        assert!(!map.contains_key(&2).unwrap());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn try_insert_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut map: FileMap<i32, i32> = FileMap::open(dir.path().join("m.bin")).unwrap();
        map.try_insert(1, 100).unwrap();
        assert!(matches!(map.try_insert(1, 200), Err(Error::DuplicateKey)));
        assert_eq!(map.try_insert_or_ignore(1, 300).unwrap(), false);
        assert_eq!(map.get(&1).unwrap(), Some(100));
    }

    #[test]
    fn iter_visits_every_live_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut map: FileMap<i32, i32> = FileMap::open(dir.path().join("m.bin")).unwrap();
        for i in 0..20 {
            map.insert(i, i * 10).unwrap();
        }
        map.remove(&5).unwrap();

        let mut seen: Vec<(i32, i32)> = map.iter().collect::<io::Result<Vec<_>>>().unwrap();
        seen.sort();
        let mut expected: Vec<(i32, i32)> = (0..20).filter(|i| *i != 5).map(|i| (i, i * 10)).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn reopening_after_close_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        {
            let mut map: FileMap<i32, i32> = FileMap::open(&path).unwrap();
            map.insert(1, 42).unwrap();
            map.close().unwrap();
        }
        let mut map: FileMap<i32, i32> = FileMap::open(&path).unwrap();
        assert_eq!(map.get(&1).unwrap(), Some(42));
    }
}
