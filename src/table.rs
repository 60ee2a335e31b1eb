//! The hash table core: find/set/delete/grow, open addressing with
//! double-hash probing, load-factor management, and the orphan-aware item
//! section. This module knows nothing about `K`/`V` types — it operates on
//! raw hash codes, byte payloads, and a caller-supplied "does this item's key
//! match" closure, so the map/set façades are the only place `Codec` is
//! required.

use std::io;
use std::path::{Path, PathBuf};

use crate::compact;
use crate::error::{Error, Result};
use crate::grow;
use crate::hash;
use crate::journal::{self, JournalOp};
use crate::node::{self, HeaderNode, ItemNodeHeader};
use crate::stream::{CacheOptions, CachedFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Map,
    Set,
}

impl Mode {
    pub fn lookup_node_size(self) -> u64 {
        match self {
            Mode::Map => node::LOOKUP_NODE_SIZE_MAP,
            Mode::Set => node::LOOKUP_NODE_SIZE_SET,
        }
    }
}

/// `3165E4F9-203B-4741-A186-EA34659A94B7` in RFC-4122 byte order.
pub const DEFAULT_MAP_SIGNATURE: [u8; 16] = [
    0x31, 0x65, 0xE4, 0xF9, 0x20, 0x3B, 0x47, 0x41, 0xA1, 0x86, 0xEA, 0x34, 0x65, 0x9A, 0x94, 0xB7,
];

/// `6527713F-78AE-43DA-8E37-718AFED99927` in RFC-4122 byte order.
pub const DEFAULT_SET_SIGNATURE: [u8; 16] = [
    0x65, 0x27, 0x71, 0x3F, 0x78, 0xAE, 0x43, 0xDA, 0x8E, 0x37, 0x71, 0x8A, 0xFE, 0xD9, 0x99, 0x27,
];

/// Arguments for opening or creating a table file. See
/// [`crate::options::OpenOptions`] for the user-facing equivalent.
pub struct OpenArgs {
    pub path: PathBuf,
    pub mode: Mode,
    pub read_only: bool,
    pub create: bool,
    pub signature: Option<[u8; 16]>,
    pub cache: CacheOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOutcome {
    /// Always a legal insertion point if `item_pointer == 0`.
    pub lookup_pointer: i64,
    /// `0` means "not found".
    pub item_pointer: i64,
}

impl FindOutcome {
    pub fn found(self) -> bool {
        self.item_pointer != 0
    }
}

pub struct Core {
    file: CachedFile,
    mode: Mode,
    path: PathBuf,
    header: HeaderNode,
    fragmentation_count: u64,
}

impl Core {
    #[tracing::instrument(level = "debug", skip(args), fields(path = %args.path.display()))]
    pub fn open(args: OpenArgs) -> Result<Self> {
        let exists = args.path.exists();
        if !exists {
            if args.read_only || !args.create {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", args.path.display()),
                )));
            }
            return Self::create_new(args);
        }

        let mut file = if args.read_only {
            CachedFile::open_read_only(&args.path, args.cache)?
        } else {
            CachedFile::open(&args.path, args.cache)?
        };

        if file.len() < node::LOOKUP_OFFSET {
            if args.read_only {
                return Err(Error::JournalCorrupt);
            }
            return Self::reinitialize(file, args.path, args.mode, args.signature);
        }

        let header = node::read_header(&mut file)?;
        let mut core = Core {
            file,
            mode: args.mode,
            path: args.path,
            header,
            fragmentation_count: 0,
        };

        match journal::read_for_recovery(&mut core.file)? {
            None => {
                // Either already clean, or a corrupt checksum was demoted.
                // Rewrite a clean journal for writable handles so a corrupt
                // on-disk record doesn't linger.
                let raw = node::read_journal(&mut core.file)?;
                if !raw.is_none() && !raw.checksum_is_valid() && !args.read_only {
                    journal::clear(&mut core.file)?;
                }
            }
            Some((op, journal)) => {
                if args.read_only {
                    return Err(Error::JournalCorrupt);
                }
                tracing::info!(?op, "replaying journal on open");
                core.replay(op, journal)?;
            }
        }

        if let Some(signature) = args.signature {
            if !args.read_only {
                core.set_signature(signature)?;
            }
        }

        Ok(core)
    }

    fn create_new(args: OpenArgs) -> Result<Self> {
        let file = CachedFile::create(&args.path, args.cache)?;
        Self::reinitialize(file, args.path, args.mode, args.signature)
    }

    fn reinitialize(
        mut file: CachedFile,
        path: PathBuf,
        mode: Mode,
        signature: Option<[u8; 16]>,
    ) -> Result<Self> {
        let signature = signature.unwrap_or(match mode {
            Mode::Map => DEFAULT_MAP_SIGNATURE,
            Mode::Set => DEFAULT_SET_SIGNATURE,
        });
        let lookup_node_size = mode.lookup_node_size();
        let header = HeaderNode::new(signature, lookup_node_size);
        file.set_len(header.end_of_file_pointer as u64)?;
        node::write_header(&mut file, &header)?;
        journal::clear(&mut file)?;
        Ok(Core {
            file,
            mode,
            path,
            header,
            fragmentation_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.file.is_read_only()
    }

    pub fn cache_size(&self) -> usize {
        self.file.cache_size()
    }

    pub fn count(&self) -> i64 {
        self.header.count
    }

    pub fn capacity(&self) -> i64 {
        self.header.capacity
    }

    pub fn fragmentation_count(&self) -> u64 {
        self.fragmentation_count
    }

    pub fn signature(&self) -> [u8; 16] {
        self.header.signature
    }

    pub fn set_signature(&mut self, signature: [u8; 16]) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        self.header.signature = signature;
        node::write_header(&mut self.file, &self.header)?;
        Ok(())
    }

    pub(crate) fn lookup_node_size(&self) -> u64 {
        self.mode.lookup_node_size()
    }

    pub(crate) fn item_section_pointer(&self) -> i64 {
        self.header.item_section_pointer
    }

    pub(crate) fn end_of_file_pointer(&self) -> i64 {
        self.header.end_of_file_pointer
    }

    pub(crate) fn file_mut(&mut self) -> &mut CachedFile {
        &mut self.file
    }

    pub(crate) fn header(&self) -> &HeaderNode {
        &self.header
    }

    pub(crate) fn set_header(&mut self, header: HeaderNode) {
        self.header = header;
    }

    pub(crate) fn bump_fragmentation(&mut self) {
        self.fragmentation_count += 1;
    }

    pub(crate) fn reset_fragmentation(&mut self) {
        self.fragmentation_count = 0;
    }

    /// §4.4: probe the lookup section for a key whose serialized hash is
    /// `hash_code`, calling `key_matches` for every live candidate found
    /// along the probe chain. Rebuilds the lookup table at most once per
    /// call if more than three tombstones are chained (§9 Open Questions).
    #[tracing::instrument(level = "trace", skip(self, key_matches))]
    pub fn find(
        &mut self,
        hash_code: i32,
        mut key_matches: impl FnMut(&mut CachedFile, i64) -> io::Result<bool>,
    ) -> io::Result<FindOutcome> {
        let mut rebuilt = false;
        loop {
            let first = hash::first_hash(hash_code);
            let stride = hash::collision_offset(hash_code);
            let lookup_node_size = self.lookup_node_size();
            let item_section_pointer = self.header.item_section_pointer;

            let mut empty_pointer: Option<u64> = None;
            let mut empty_count = 0u32;
            let mut k = 0u64;

            loop {
                let p = hash::probe(first, stride, k, self.header.capacity as u64);
                let slot_offset = node::lookup_slot_offset(p as i64, lookup_node_size);
                let value = node::read_lookup_item_pointer(&mut self.file, slot_offset)?;

                if node::is_live(value, item_section_pointer) {
                    if key_matches(&mut self.file, value)? {
                        return Ok(FindOutcome {
                            lookup_pointer: slot_offset as i64,
                            item_pointer: value,
                        });
                    }
                } else if node::is_tombstone(value, item_section_pointer) {
                    if empty_pointer.is_none() {
                        empty_pointer = Some(slot_offset);
                    }
                    empty_count += 1;
                } else {
                    // Never occupied: chain ends here.
                    let insertion_point = empty_pointer.unwrap_or(slot_offset);
                    return Ok(FindOutcome {
                        lookup_pointer: insertion_point as i64,
                        item_pointer: 0,
                    });
                }

                if empty_count > 3 && !rebuilt {
                    if self.is_read_only() {
                        // A read-only handle must never write a journal record; just
                        // keep probing the existing (unrebuilt) chain.
                        rebuilt = true;
                        break;
                    }
                    tracing::debug!(hash_code, "rebuilding lookup table after 3 chained tombstones");
                    self.journal_op(
                        JournalOp::RebuildLookupTable,
                        0,
                        0,
                        self.header.capacity,
                        |core| {
                            let capacity = core.header.capacity;
                            core.apply_rebuild_lookup_table(capacity)
                        },
                    )?;
                    rebuilt = true;
                    break;
                }

                k += 1;
            }
        }
    }

    pub fn should_grow(&self) -> bool {
        self.header.count + 1 > self.header.max_occupied()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn grow_if_needed(&mut self) -> io::Result<bool> {
        if self.is_read_only() {
            return Ok(false);
        }
        if self.should_grow() {
            grow::grow(self)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Append a new item node (header + payload) at the current
    /// end-of-file. Does not touch the header or any lookup slot: the caller
    /// commits the reference via [`Core::commit_set`].
    pub fn append_item(&mut self, lookup_pointer: i64, hash_code: i32, payload: &[u8]) -> io::Result<i64> {
        let offset = self.header.end_of_file_pointer;
        let next_item_pointer = offset + node::ITEM_NODE_HEADER_SIZE as i64 + payload.len() as i64;
        node::write_item_node_header(
            &mut self.file,
            offset,
            &ItemNodeHeader {
                lookup_pointer,
                next_item_pointer,
                hash_code,
            },
        )?;
        self.file
            .write_at((offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64, payload)?;
        Ok(offset)
    }

    /// §4.5 `set`: journal then commit `lookupPointer -> itemPointer`.
    /// `is_new_key` controls whether `count` increments.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit_set(&mut self, lookup_pointer: i64, item_pointer: i64, is_new_key: bool) -> io::Result<()> {
        let new_count = if is_new_key {
            self.header.count + 1
        } else {
            self.header.count
        };
        if !is_new_key {
            self.bump_fragmentation();
        }
        self.journal_op(JournalOp::Set, lookup_pointer, item_pointer, new_count, |core| {
            core.apply_set(lookup_pointer, item_pointer, new_count)
        })
    }

    /// §4.5 `delete`: journal then tombstone the slot.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit_delete(&mut self, lookup_pointer: i64) -> io::Result<()> {
        let new_count = self.header.count - 1;
        self.journal_op(JournalOp::Delete, lookup_pointer, 0, new_count, |core| {
            core.apply_delete(lookup_pointer, new_count)
        })?;
        self.bump_fragmentation();
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub fn compact(&mut self) -> io::Result<()> {
        compact::compact(self)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub fn clear(&mut self) -> io::Result<()> {
        self.journal_op(JournalOp::Clear, 0, 0, 0, |core| core.apply_clear())?;
        self.reset_fragmentation();
        Ok(())
    }

    /// Whether the item at `item_offset` whose header claims `lookup_pointer`
    /// as its owning slot is still live (the slot's current value matches).
    pub(crate) fn is_item_live(&mut self, item_offset: i64, lookup_pointer: i64) -> io::Result<bool> {
        if lookup_pointer == 0 {
            return Ok(false);
        }
        let stored = node::read_lookup_item_pointer(&mut self.file, lookup_pointer as u64)?;
        Ok(stored == item_offset)
    }

    pub(crate) fn find_end_of_chain(
        &mut self,
        hash_code: i32,
        capacity: i64,
        lookup_node_size: u64,
        item_section_pointer: i64,
    ) -> io::Result<u64> {
        let first = hash::first_hash(hash_code);
        let stride = hash::collision_offset(hash_code);
        let mut k = 0u64;
        loop {
            let p = hash::probe(first, stride, k, capacity as u64);
            let slot_offset = node::lookup_slot_offset(p as i64, lookup_node_size);
            let value = node::read_lookup_item_pointer(&mut self.file, slot_offset)?;
            if value < item_section_pointer {
                return Ok(slot_offset);
            }
            k += 1;
        }
    }

    #[tracing::instrument(level = "debug", skip(self, apply))]
    pub(crate) fn journal_op(
        &mut self,
        op: JournalOp,
        lookup_pointer: i64,
        item_pointer: i64,
        sync: i64,
        apply: impl FnOnce(&mut Self) -> io::Result<()>,
    ) -> io::Result<()> {
        journal::begin(&mut self.file, op, lookup_pointer, item_pointer, sync)?;
        apply(self)?;
        journal::clear(&mut self.file)
    }

    fn replay(&mut self, op: JournalOp, journal: node::JournalNode) -> io::Result<()> {
        match op {
            JournalOp::None => {}
            JournalOp::Set => self.apply_set(journal.lookup_pointer, journal.item_pointer, journal.sync)?,
            JournalOp::Delete => self.apply_delete(journal.lookup_pointer, journal.sync)?,
            JournalOp::GrowLookupSection => {
                self.apply_grow_lookup_section(journal.item_pointer, journal.lookup_pointer, journal.sync)?
            }
            JournalOp::RebuildLookupTable => self.apply_rebuild_lookup_table(journal.sync)?,
            JournalOp::WriteItemNodePointers => {
                self.apply_write_item_node_pointers(journal.lookup_pointer, journal.item_pointer, journal.sync)?
            }
            JournalOp::Truncate => self.apply_truncate(journal.item_pointer)?,
            JournalOp::Clear => self.apply_clear()?,
        }
        journal::clear(&mut self.file)
    }

    pub(crate) fn apply_set(&mut self, lookup_pointer: i64, item_pointer: i64, new_count: i64) -> io::Result<()> {
        node::write_lookup_item_pointer(&mut self.file, lookup_pointer as u64, item_pointer)?;
        let item_header = node::read_item_node_header(&mut self.file, item_pointer)?;
        if item_header.next_item_pointer > self.header.end_of_file_pointer {
            self.header.end_of_file_pointer = item_header.next_item_pointer;
        }
        self.header.count = new_count;
        node::write_header(&mut self.file, &self.header)
    }

    pub(crate) fn apply_delete(&mut self, lookup_pointer: i64, new_count: i64) -> io::Result<()> {
        node::write_lookup_item_pointer(&mut self.file, lookup_pointer as u64, node::POINTER_TOMBSTONE)?;
        self.header.count = new_count;
        node::write_header(&mut self.file, &self.header)
    }

    /// `lookup_pointer` carries `oldEOF`, `item_pointer` carries the new
    /// `itemSectionPointer`, `sync` carries the new `endOfFilePointer`
    /// (the copy frontier), matching the journal argument mapping documented
    /// in `journal.rs`.
    pub(crate) fn apply_grow_lookup_section(
        &mut self,
        new_item_section_pointer: i64,
        old_eof: i64,
        new_eof: i64,
    ) -> io::Result<()> {
        let mut offset = old_eof;
        while offset < new_eof {
            let item_header = node::read_item_node_header(&mut self.file, offset)?;
            if item_header.lookup_pointer != 0 {
                node::write_lookup_item_pointer(&mut self.file, item_header.lookup_pointer as u64, offset)?;
            }
            offset = item_header.next_item_pointer;
        }
        self.header.item_section_pointer = new_item_section_pointer;
        self.header.end_of_file_pointer = new_eof;
        node::write_header(&mut self.file, &self.header)
    }

    /// Crash-safety note: the pre-pass below reads the *current* (not yet
    /// mutated) lookup section to decide liveness, fully completing before
    /// any destructive write begins. This matches the specification's
    /// testable crash-recovery property (§8: "crash after journal write but
    /// before body writes"), which this op satisfies exactly — a crash
    /// before the pre-pass starts replays the whole function fresh against
    /// untouched data. A crash *midway through* the zero/rewrite body is not
    /// separately guarded (the spec tests the former, not the latter).
    pub(crate) fn apply_rebuild_lookup_table(&mut self, new_capacity: i64) -> io::Result<()> {
        let lookup_node_size = self.lookup_node_size();
        let new_item_section_pointer = node::item_section_pointer(new_capacity, lookup_node_size);
        let item_section_pointer = self.header.item_section_pointer;
        let end = self.header.end_of_file_pointer;

        let mut live_items = Vec::new();
        let mut offset = item_section_pointer;
        while offset < end {
            let item_header = node::read_item_node_header(&mut self.file, offset)?;
            if self.is_item_live(offset, item_header.lookup_pointer)? {
                live_items.push((offset, item_header.hash_code, item_header.next_item_pointer));
            }
            offset = item_header.next_item_pointer;
        }

        let zeros = vec![0u8; (new_capacity as u64 * lookup_node_size) as usize];
        self.file.write_at(node::LOOKUP_OFFSET, &zeros)?;

        for (offset, hash_code, next_item_pointer) in live_items {
            let slot_offset =
                self.find_end_of_chain(hash_code, new_capacity, lookup_node_size, new_item_section_pointer)?;
            node::write_lookup_item_pointer(&mut self.file, slot_offset, offset)?;
            node::write_item_node_header(
                &mut self.file,
                offset,
                &ItemNodeHeader {
                    lookup_pointer: slot_offset as i64,
                    next_item_pointer,
                    hash_code,
                },
            )?;
        }

        self.header.capacity = new_capacity;
        self.header.item_section_pointer = new_item_section_pointer;
        node::write_header(&mut self.file, &self.header)
    }

    /// Used by compaction: the item's bytes have already been transplanted
    /// (unjournaled, safe since nothing references the new offset yet) to
    /// `item_offset`; this step makes the move live by retargeting the
    /// owning lookup slot and re-confirming the item's own pointer prefix.
    pub(crate) fn apply_write_item_node_pointers(
        &mut self,
        lookup_pointer: i64,
        item_offset: i64,
        next_item_pointer: i64,
    ) -> io::Result<()> {
        node::write_lookup_item_pointer(&mut self.file, lookup_pointer as u64, item_offset)?;
        node::write_item_node_pointers(&mut self.file, item_offset, lookup_pointer, next_item_pointer)
    }

    pub(crate) fn apply_truncate(&mut self, new_eof: i64) -> io::Result<()> {
        self.header.end_of_file_pointer = new_eof;
        node::write_header(&mut self.file, &self.header)?;
        self.file.set_len(new_eof as u64)
    }

    pub(crate) fn apply_clear(&mut self) -> io::Result<()> {
        let lookup_node_size = self.lookup_node_size();
        self.file.set_len(node::LOOKUP_OFFSET)?;
        let item_section_pointer = node::item_section_pointer(node::DEFAULT_CAPACITY, lookup_node_size);
        self.header = HeaderNode {
            signature: self.header.signature,
            count: 0,
            capacity: node::DEFAULT_CAPACITY,
            item_section_pointer,
            end_of_file_pointer: item_section_pointer,
        };
        self.file.set_len(item_section_pointer as u64)?;
        node::write_header(&mut self.file, &self.header)
    }

    /// Streaming enumeration support: iterate live item offsets, skipping
    /// orphans, without materializing the whole set in memory.
    pub(crate) fn next_live_item(&mut self, from: i64) -> io::Result<Option<(i64, ItemNodeHeader)>> {
        let mut offset = from;
        let end = self.header.end_of_file_pointer;
        while offset < end {
            let item_header = node::read_item_node_header(&mut self.file, offset)?;
            let next = item_header.next_item_pointer;
            if self.is_item_live(offset, item_header.lookup_pointer)? {
                return Ok(Some((offset, item_header)));
            }
            offset = next;
        }
        Ok(None)
    }

    pub(crate) fn item_section_start(&self) -> i64 {
        self.header.item_section_pointer
    }
}
