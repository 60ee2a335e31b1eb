//! Node I/O: reads and writes the four node types at byte-exact offsets.
//!
//! The header and journal have a fixed universal shape and are expressed as
//! `deku`-derived structs (mirroring the teacher crate's own `Header`/
//! `ObjectHeader` structs), whereas the lookup and item nodes vary in size
//! with the container mode (map vs. set) and payload length, so they are
//! read and written directly through [`crate::codec`].

use deku::prelude::*;
use std::io;

use crate::codec;
use crate::stream::CachedFile;

pub const HEADER_OFFSET: u64 = 0;
pub const HEADER_SIZE: u64 = 48;
pub const JOURNAL_OFFSET: u64 = HEADER_OFFSET + HEADER_SIZE;
pub const JOURNAL_SIZE: u64 = 32;
pub const LOOKUP_OFFSET: u64 = JOURNAL_OFFSET + JOURNAL_SIZE;

pub const ITEM_NODE_HEADER_SIZE: u64 = 20;

pub const LOOKUP_NODE_SIZE_MAP: u64 = 8;
pub const LOOKUP_NODE_SIZE_SET: u64 = 12;

/// Never written to; a slot holding this value has never been occupied.
pub const POINTER_NEVER_OCCUPIED: i64 = 0;
/// A slot holding this value was occupied once and has since been deleted.
pub const POINTER_TOMBSTONE: i64 = 1;

pub const DEFAULT_CAPACITY: i64 = 16;
pub const LOAD_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct HeaderNode {
    pub signature: [u8; 16],
    pub count: i64,
    pub capacity: i64,
    pub item_section_pointer: i64,
    pub end_of_file_pointer: i64,
}

const _: () = assert!(HEADER_SIZE as usize == 16 + 8 * 4);

impl HeaderNode {
    pub fn new(signature: [u8; 16], lookup_node_size: u64) -> Self {
        let capacity = DEFAULT_CAPACITY;
        let item_section_pointer = item_section_pointer(capacity, lookup_node_size);
        HeaderNode {
            signature,
            count: 0,
            capacity,
            item_section_pointer,
            end_of_file_pointer: item_section_pointer,
        }
    }

    pub fn max_occupied(&self) -> i64 {
        (self.capacity as f64 * LOAD_FACTOR) as i64
    }
}

/// `item_section_pointer = 80 + capacity * lookup_node_size` (Invariant 2).
pub fn item_section_pointer(capacity: i64, lookup_node_size: u64) -> i64 {
    LOOKUP_OFFSET as i64 + capacity * lookup_node_size as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct JournalNode {
    pub operation: i32,
    pub lookup_pointer: i64,
    pub item_pointer: i64,
    pub sync: i64,
    pub checksum: i32,
}

const _: () = assert!(JOURNAL_SIZE as usize == 4 + 8 * 3 + 4);

impl JournalNode {
    pub const NONE: i32 = 0;

    /// A cleared journal: operation `None`, zeroed arguments, checksum of
    /// that zeroed record.
    pub fn cleared() -> Self {
        Self::new(Self::NONE, 0, 0, 0)
    }

    pub fn new(operation: i32, lookup_pointer: i64, item_pointer: i64, sync: i64) -> Self {
        let mut node = JournalNode {
            operation,
            lookup_pointer,
            item_pointer,
            sync,
            checksum: 0,
        };
        node.checksum = node.compute_checksum();
        node
    }

    /// CRC-32 of the 28 bytes preceding the checksum field.
    pub fn compute_checksum(&self) -> i32 {
        let mut buf = [0u8; 28];
        buf[0..4].copy_from_slice(&self.operation.to_le_bytes());
        buf[4..12].copy_from_slice(&self.lookup_pointer.to_le_bytes());
        buf[12..20].copy_from_slice(&self.item_pointer.to_le_bytes());
        buf[20..28].copy_from_slice(&self.sync.to_le_bytes());
        crc32fast::hash(&buf) as i32
    }

    pub fn checksum_is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    pub fn is_none(&self) -> bool {
        self.operation == Self::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemNodeHeader {
    pub lookup_pointer: i64,
    pub next_item_pointer: i64,
    pub hash_code: i32,
}

pub fn read_header(file: &mut CachedFile) -> io::Result<HeaderNode> {
    let mut buf = [0u8; HEADER_SIZE as usize];
    file.read_at(HEADER_OFFSET, &mut buf)?;
    let ((_, _), node) = HeaderNode::from_bytes((&buf, 0))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(node)
}

#[tracing::instrument(level = "trace", skip(file, header))]
pub fn write_header(file: &mut CachedFile, header: &HeaderNode) -> io::Result<()> {
    let bytes = header
        .to_bytes()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    file.write_at(HEADER_OFFSET, &bytes)
}

pub fn read_journal(file: &mut CachedFile) -> io::Result<JournalNode> {
    let mut buf = [0u8; JOURNAL_SIZE as usize];
    file.read_at(JOURNAL_OFFSET, &mut buf)?;
    let ((_, _), node) = JournalNode::from_bytes((&buf, 0))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(node)
}

#[tracing::instrument(level = "trace", skip(file, journal))]
pub fn write_journal(file: &mut CachedFile, journal: &JournalNode) -> io::Result<()> {
    let bytes = journal
        .to_bytes()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    file.write_at(JOURNAL_OFFSET, &bytes)
}

pub fn lookup_slot_offset(index: i64, lookup_node_size: u64) -> u64 {
    LOOKUP_OFFSET + (index as u64) * lookup_node_size
}

pub fn read_lookup_item_pointer(file: &mut CachedFile, slot_offset: u64) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    file.read_at(slot_offset, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn write_lookup_item_pointer(
    file: &mut CachedFile,
    slot_offset: u64,
    value: i64,
) -> io::Result<()> {
    file.write_at(slot_offset, &value.to_le_bytes())
}

/// The marker column only exists in set mode, at byte offset 8 of the slot.
pub fn read_lookup_marker(file: &mut CachedFile, slot_offset: u64) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    file.read_at(slot_offset + 8, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_lookup_marker(file: &mut CachedFile, slot_offset: u64, value: i32) -> io::Result<()> {
    file.write_at(slot_offset + 8, &value.to_le_bytes())
}

pub fn read_item_node_header(file: &mut CachedFile, offset: i64) -> io::Result<ItemNodeHeader> {
    let mut buf = [0u8; ITEM_NODE_HEADER_SIZE as usize];
    file.read_at(offset as u64, &mut buf)?;
    let mut cursor = io::Cursor::new(&buf[..]);
    Ok(ItemNodeHeader {
        lookup_pointer: codec::read_i64(&mut cursor)?,
        next_item_pointer: codec::read_i64(&mut cursor)?,
        hash_code: codec::read_i32(&mut cursor)?,
    })
}

pub fn write_item_node_header(
    file: &mut CachedFile,
    offset: i64,
    header: &ItemNodeHeader,
) -> io::Result<()> {
    let mut buf = Vec::with_capacity(ITEM_NODE_HEADER_SIZE as usize);
    codec::write_i64(&mut buf, header.lookup_pointer)?;
    codec::write_i64(&mut buf, header.next_item_pointer)?;
    codec::write_i32(&mut buf, header.hash_code)?;
    file.write_at(offset as u64, &buf)
}

/// Rewrite just the `(lookup_pointer, next_item_pointer)` prefix of an item
/// node, leaving `hash_code` and the payload untouched — used by
/// `WriteItemNodePointers` during compaction.
pub fn write_item_node_pointers(
    file: &mut CachedFile,
    offset: i64,
    lookup_pointer: i64,
    next_item_pointer: i64,
) -> io::Result<()> {
    let mut buf = Vec::with_capacity(16);
    codec::write_i64(&mut buf, lookup_pointer)?;
    codec::write_i64(&mut buf, next_item_pointer)?;
    file.write_at(offset as u64, &buf)
}

/// A slot is live iff its `itemPointer` points at or past the item section.
pub fn is_live(item_pointer: i64, item_section_pointer: i64) -> bool {
    item_pointer >= item_section_pointer
}

/// Any stored value below `itemSectionPointer` other than `0`/`1` is treated
/// as a tombstone (Data Model §3, lookup node special values).
pub fn is_tombstone(item_pointer: i64, item_section_pointer: i64) -> bool {
    item_pointer != POINTER_NEVER_OCCUPIED && !is_live(item_pointer, item_section_pointer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = HeaderNode::new([7u8; 16], LOOKUP_NODE_SIZE_MAP);
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            CachedFile::create(&dir.path().join("f"), Default::default()).unwrap();
        file.set_len(HEADER_OFFSET + HEADER_SIZE).unwrap();
        write_header(&mut file, &header).unwrap();
        let back = read_header(&mut file).unwrap();
        assert_eq!(header, back);
    }

    #[test]
    fn journal_checksum_detects_corruption() {
        let mut journal = JournalNode::new(1, 100, 200, 300);
        assert!(journal.checksum_is_valid());
        journal.sync = 301;
        assert!(!journal.checksum_is_valid());
    }

    #[test]
    fn cleared_journal_is_none() {
        let journal = JournalNode::cleared();
        assert!(journal.is_none());
        assert!(journal.checksum_is_valid());
    }

    #[test]
    fn item_section_pointer_matches_invariant() {
        assert_eq!(
            item_section_pointer(16, LOOKUP_NODE_SIZE_MAP),
            LOOKUP_OFFSET as i64 + 16 * 8
        );
    }
}
