//! `FileSet<K>`: the file-backed set façade. Shares its storage engine with
//! [`crate::map::FileMap`] (same [`crate::table::Core`], same node formats)
//! but stores only the key in each item's payload, and carries the
//! marker-column set-algebra operations from [`crate::marker`] that only
//! make sense when there is no value half to reconcile.

use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::{Error, Result};
use crate::hash;
use crate::marker;
use crate::node;
use crate::options::OpenOptions;
use crate::serializer::Codec;
use crate::stream::FileCursor;
use crate::table::{Core, FindOutcome, Mode};

pub struct FileSet<K> {
    core: Core,
    _marker: PhantomData<K>,
}

impl<K: Codec + Eq> FileSet<K> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenOptions::default().read_only(true).create(false))
    }

    pub fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let args = options.into_args(path.as_ref().to_path_buf(), Mode::Set);
        let core = Core::open(args)?;
        Ok(FileSet {
            core,
            _marker: PhantomData,
        })
    }

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

    pub fn compact(&mut self) -> Result<()> {
        self.core.compact()?;
        Ok(())
    }

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

    pub fn contains(&mut self, key: &K) -> Result<bool> {
        Ok(self.find_by_key(key)?.found())
    }

    /// §4.5 `add`: returns `true` if the key was newly inserted.
    #[tracing::instrument(level = "debug", skip(self, key))]
    pub fn try_insert(&mut self, key: K) -> Result<bool> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (hash_code, key_bytes) = Self::encode_key(&key)?;
        let mut outcome = self.find_by_key(&key)?;
        if outcome.found() {
            return Ok(false);
        }
        if self.core.grow_if_needed()? {
            outcome = self.find_by_key(&key)?;
        }
        let item_offset = self.core.append_item(outcome.lookup_pointer, hash_code, &key_bytes)?;
        self.core.commit_set(outcome.lookup_pointer, item_offset, true)?;
        Ok(true)
    }

    pub fn remove(&mut self, key: &K) -> Result<bool> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let outcome = self.find_by_key(key)?;
        if !outcome.found() {
            return Ok(false);
        }
        self.core.commit_delete(outcome.lookup_pointer)?;
        Ok(true)
    }

    pub fn iter(&mut self) -> Iter<'_, K> {
        let offset = self.core.item_section_start();
        Iter {
            core: &mut self.core,
            offset,
            _marker: PhantomData,
        }
    }

    /// §4.9 `UnionWith`: insert every element of `other` that isn't already
    /// present.
    pub fn union_with(&mut self, other: impl IntoIterator<Item = K>) -> Result<()> {
        for key in other {
            self.try_insert(key)?;
        }
        Ok(())
    }

    /// §4.9 `IntersectWith`: keep only elements also present in `other`.
    pub fn intersect_with(&mut self, other: impl IntoIterator<Item = K>) -> Result<()> {
        marker::unmark_all(&mut self.core)?;
        for key in other {
            let (hash_code, _) = Self::encode_key(&key)?;
            marker::try_mark(&mut self.core, hash_code, |file, item_offset| {
                let mut cursor = FileCursor::new(file, (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64);
                let candidate = K::read_from(&mut cursor)?;
                Ok(candidate == key)
            })?;
        }
        marker::remove_unmarked(&mut self.core)?;
        Ok(())
    }

    /// §4.9 `ExceptWith`: remove every element also present in `other`.
    pub fn except_with(&mut self, other: impl IntoIterator<Item = K>) -> Result<()> {
        for key in other {
            self.remove(&key)?;
        }
        Ok(())
    }

    /// §4.9 `SymmetricExceptWith`: keep elements present in exactly one of
    /// `self`/`other`.
    pub fn symmetric_except_with(&mut self, other: impl IntoIterator<Item = K>) -> Result<()>
    where
        K: Clone,
    {
        marker::unmark_all(&mut self.core)?;
        for key in other {
            let (hash_code, _) = Self::encode_key(&key)?;
            let marked = marker::try_mark(&mut self.core, hash_code, {
                let key = key.clone();
                move |file, item_offset| {
                    let mut cursor =
                        FileCursor::new(file, (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64);
                    let candidate = K::read_from(&mut cursor)?;
                    Ok(candidate == key)
                }
            })?;
            if !marked {
                self.try_insert(key)?;
            }
        }
        marker::remove_marked(&mut self.core)?;
        Ok(())
    }

    /// §4.9 `SetEquals`: same elements, regardless of storage order.
    pub fn set_equals(&mut self, other: impl IntoIterator<Item = K>) -> Result<bool>
    where
        K: Clone,
    {
        marker::unmark_all(&mut self.core)?;
        for key in other {
            let (hash_code, _) = Self::encode_key(&key)?;
            let found = marker::try_mark(&mut self.core, hash_code, {
                let key = key.clone();
                move |file, item_offset| {
                    let mut cursor =
                        FileCursor::new(file, (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64);
                    let candidate = K::read_from(&mut cursor)?;
                    Ok(candidate == key)
                }
            })?;
            if !found {
                return Ok(false);
            }
        }
        marker::all_marked(&mut self.core).map_err(Error::from)
    }

    /// §4.9 `IsSubsetOf`: every element of `self` is in `other`.
    pub fn is_subset_of(&mut self, other: impl IntoIterator<Item = K>) -> Result<bool>
    where
        K: Clone,
    {
        marker::unmark_all(&mut self.core)?;
        for key in other {
            let (hash_code, _) = Self::encode_key(&key)?;
            marker::try_mark(&mut self.core, hash_code, {
                let key = key.clone();
                move |file, item_offset| {
                    let mut cursor =
                        FileCursor::new(file, (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64);
                    let candidate = K::read_from(&mut cursor)?;
                    Ok(candidate == key)
                }
            })?;
        }
        marker::all_marked(&mut self.core).map_err(Error::from)
    }

    /// §4.9 `IsSupersetOf`: every element of `other` is in `self`.
    pub fn is_superset_of(&mut self, other: impl IntoIterator<Item = K>) -> Result<bool> {
        for key in other {
            if !self.contains(&key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// §4.9 `IsProperSubsetOf`: every element of `self` is in `other`, and
    /// `other` has at least one element `self` doesn't (tracked as `extra`
    /// while marking, not by comparing lengths — `other` may repeat
    /// elements).
    pub fn is_proper_subset_of(&mut self, other: impl IntoIterator<Item = K>) -> Result<bool>
    where
        K: Clone,
    {
        marker::unmark_all(&mut self.core)?;
        let mut extra = false;
        for key in other {
            let (hash_code, _) = Self::encode_key(&key)?;
            let found = marker::try_mark(&mut self.core, hash_code, {
                let key = key.clone();
                move |file, item_offset| {
                    let mut cursor =
                        FileCursor::new(file, (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64);
                    let candidate = K::read_from(&mut cursor)?;
                    Ok(candidate == key)
                }
            })?;
            if !found {
                extra = true;
            }
        }
        Ok(extra && marker::all_marked(&mut self.core)?)
    }

    /// §4.9 `IsProperSupersetOf`: every element of `other` is in `self`, and
    /// `self` has at least one element `other` doesn't.
    pub fn is_proper_superset_of(&mut self, other: impl IntoIterator<Item = K>) -> Result<bool>
    where
        K: Clone,
    {
        marker::unmark_all(&mut self.core)?;
        for key in other {
            let (hash_code, _) = Self::encode_key(&key)?;
            let found = marker::try_mark(&mut self.core, hash_code, {
                let key = key.clone();
                move |file, item_offset| {
                    let mut cursor =
                        FileCursor::new(file, (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64);
                    let candidate = K::read_from(&mut cursor)?;
                    Ok(candidate == key)
                }
            })?;
            if !found {
                return Ok(false);
            }
        }
        Ok(!marker::all_marked(&mut self.core)?)
    }

    /// §4.9 `Overlaps`: shares at least one element with `other`.
    pub fn overlaps(&mut self, other: impl IntoIterator<Item = K>) -> Result<bool> {
        for key in other {
            if self.contains(&key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub struct Iter<'a, K> {
    core: &'a mut Core,
    offset: i64,
    _marker: PhantomData<K>,
}

impl<'a, K: Codec> Iterator for Iter<'a, K> {
    type Item = io::Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.core.next_live_item(self.offset) {
            Ok(Some((item_offset, header))) => {
                self.offset = header.next_item_pointer;
                let mut cursor = FileCursor::new(
                    self.core.file_mut(),
                    (item_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64,
                );
                Some(K::read_from(&mut cursor))
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
    fn insert_contains_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut set: FileSet<i32> = FileSet::open(dir.path().join("s.bin")).unwrap();
        assert!(set.try_insert(1).unwrap());
        assert!(!set.try_insert(1).unwrap());
        assert!(set.contains(&1).unwrap());
        assert_eq!(set.len(), 1);
        assert!(set.remove(&1).unwrap());
        assert!(!set.contains(&1).unwrap());
    }

    #[test]
    fn intersect_with_keeps_only_common_elements() {
        let dir = tempfile::tempdir().unwrap();
        let mut set: FileSet<i32> = FileSet::open(dir.path().join("s.bin")).unwrap();
        set.union_with([1, 2, 3, 4]).unwrap();
        set.intersect_with([2, 3, 5]).unwrap();
        let mut items: Vec<i32> = set.iter().collect::<io::Result<Vec<_>>>().unwrap();
        items.sort();
        assert_eq!(items, vec![2, 3]);
    }

    #[test]
    fn except_with_removes_common_elements() {
        let dir = tempfile::tempdir().unwrap();
        let mut set: FileSet<i32> = FileSet::open(dir.path().join("s.bin")).unwrap();
        set.union_with([1, 2, 3]).unwrap();
        set.except_with([2]).unwrap();
        let mut items: Vec<i32> = set.iter().collect::<io::Result<Vec<_>>>().unwrap();
        items.sort();
        assert_eq!(items, vec![1, 3]);
    }

    #[test]
    fn symmetric_except_with_keeps_unique_elements() {
        let dir = tempfile::tempdir().unwrap();
        let mut set: FileSet<i32> = FileSet::open(dir.path().join("s.bin")).unwrap();
        set.union_with([1, 2, 3]).unwrap();
        set.symmetric_except_with([2, 3, 4]).unwrap();
        let mut items: Vec<i32> = set.iter().collect::<io::Result<Vec<_>>>().unwrap();
        items.sort();
        assert_eq!(items, vec![1, 4]);
    }

    #[test]
    fn set_equals_and_subset_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut set: FileSet<i32> = FileSet::open(dir.path().join("s.bin")).unwrap();
        set.union_with([1, 2, 3]).unwrap();
        assert!(set.set_equals([3, 2, 1]).unwrap());
        assert!(!set.set_equals([1, 2]).unwrap());
        assert!(set.is_subset_of([1, 2, 3, 4]).unwrap());
        assert!(set.is_superset_of([1, 2]).unwrap());
        assert!(set.overlaps([5, 3]).unwrap());
        assert!(!set.overlaps([5, 6]).unwrap());
    }

    #[test]
    fn set_equals_and_proper_subset_ignore_duplicates_in_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut set: FileSet<i32> = FileSet::open(dir.path().join("s.bin")).unwrap();
        set.union_with([1, 2, 3]).unwrap();

        // A repeated element in `other` must not make an equal set compare unequal.
        assert!(set.set_equals([1, 2, 2, 3]).unwrap());
        assert!(!set.is_proper_subset_of([1, 2, 2, 3]).unwrap());
        assert!(!set.is_proper_superset_of([1, 2, 2, 3]).unwrap());

        assert!(set.is_proper_subset_of([1, 2, 3, 4]).unwrap());
        assert!(!set.is_proper_subset_of([1, 2, 3]).unwrap());

        let mut smaller: FileSet<i32> = FileSet::open(dir.path().join("t.bin")).unwrap();
        smaller.union_with([1, 2]).unwrap();
        assert!(smaller.is_proper_subset_of([1, 1, 2, 3]).unwrap());
        assert!(set.is_proper_superset_of([1, 1, 2]).unwrap());
    }
}
