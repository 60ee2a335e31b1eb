//! The journal protocol: the eight operation codes and the write/clear
//! halves of the three-step protocol described in the specification's
//! journal section. Replay (re-applying a dirty journal's stored arguments)
//! lives in [`crate::table`], since it needs the hash table core's node
//! writers; this module only knows how to serialize/deserialize/validate the
//! 32-byte record itself.

use std::io;

use crate::node::{self, JournalNode};
use crate::stream::CachedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum JournalOp {
    None = 0,
    Set = 1,
    Delete = 2,
    GrowLookupSection = 3,
    RebuildLookupTable = 4,
    WriteItemNodePointers = 5,
    Truncate = 6,
    Clear = 7,
}

impl JournalOp {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => JournalOp::None,
            1 => JournalOp::Set,
            2 => JournalOp::Delete,
            3 => JournalOp::GrowLookupSection,
            4 => JournalOp::RebuildLookupTable,
            5 => JournalOp::WriteItemNodePointers,
            6 => JournalOp::Truncate,
            7 => JournalOp::Clear,
            _ => return None,
        })
    }
}

/// Step 1 of the protocol: populate the journal record and flush.
#[tracing::instrument(level = "debug", skip(file))]
pub fn begin(
    file: &mut CachedFile,
    op: JournalOp,
    lookup_pointer: i64,
    item_pointer: i64,
    sync: i64,
) -> io::Result<()> {
    let journal = JournalNode::new(op as i32, lookup_pointer, item_pointer, sync);
    node::write_journal(file, &journal)?;
    file.flush()
}

/// Step 3 of the protocol: overwrite the journal with `None` and flush.
#[tracing::instrument(level = "debug", skip(file))]
pub fn clear(file: &mut CachedFile) -> io::Result<()> {
    node::write_journal(file, &JournalNode::cleared())?;
    file.flush()
}

/// Read the journal and decide what recovery (if any) is needed.
///
/// A checksum mismatch is demoted to `None` per the specification: a
/// truncated or corrupted journal record can never be trusted, so it is
/// treated exactly as if it were clean.
pub fn read_for_recovery(file: &mut CachedFile) -> io::Result<Option<(JournalOp, JournalNode)>> {
    let journal = node::read_journal(file)?;
    if !journal.checksum_is_valid() {
        tracing::warn!("journal checksum mismatch, demoting to None");
        return Ok(None);
    }
    if journal.is_none() {
        return Ok(None);
    }
    let Some(op) = JournalOp::from_i32(journal.operation) else {
        tracing::warn!(operation = journal.operation, "unknown journal operation, demoting to None");
        return Ok(None);
    };
    Ok(Some((op, journal)))
}
