//! The grow algorithm (§4.7): doubles capacity, relocates live items past the
//! newly-widened lookup section, then rebuilds the lookup table against the
//! relocated item section. Two journaled sub-operations, `GrowLookupSection`
//! and `RebuildLookupTable`, bound the two halves so a crash mid-grow leaves
//! the file in a state replay can resume from.

use std::io;

use crate::journal::JournalOp;
use crate::node::{self, ItemNodeHeader};
use crate::table::Core;

#[tracing::instrument(level = "info", skip(core))]
pub fn grow(core: &mut Core) -> io::Result<()> {
    let lookup_node_size = core.lookup_node_size();
    let old_capacity = core.header().capacity;
    let new_capacity = old_capacity * 2;
    let new_item_section_pointer = node::item_section_pointer(new_capacity, lookup_node_size);
    let old_item_section_pointer = core.item_section_pointer();
    let current_eof = core.end_of_file_pointer();

    tracing::debug!(old_capacity, new_capacity, "growing lookup section");

    // If the new, wider lookup section would overrun the current
    // end-of-file, park a synthetic orphan item node at the old end that
    // jumps straight to the new item section pointer, so the gap between
    // them is never read as live data and is never dereferenced again.
    let copy_frontier_start = if new_item_section_pointer > current_eof + node::ITEM_NODE_HEADER_SIZE as i64 {
        node::write_item_node_header(
            core.file_mut(),
            current_eof,
            &ItemNodeHeader {
                lookup_pointer: 0,
                next_item_pointer: new_item_section_pointer,
                hash_code: 0,
            },
        )?;
        new_item_section_pointer
    } else {
        current_eof.max(new_item_section_pointer)
    };

    // Copy every still-live item from the old item section to the copy
    // frontier, in item order, skipping orphans entirely — the post-grow
    // item section therefore never contains dead items.
    let mut read_offset = old_item_section_pointer;
    let mut write_offset = copy_frontier_start;
    while read_offset < current_eof {
        let item_header = node::read_item_node_header(core.file_mut(), read_offset)?;
        let next_read = item_header.next_item_pointer;
        if core.is_item_live(read_offset, item_header.lookup_pointer)? {
            let payload_len = (next_read - read_offset - node::ITEM_NODE_HEADER_SIZE as i64) as usize;
            let mut payload = vec![0u8; payload_len];
            core.file_mut()
                .read_at((read_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64, &mut payload)?;

            let new_next = write_offset + node::ITEM_NODE_HEADER_SIZE as i64 + payload_len as i64;
            node::write_item_node_header(
                core.file_mut(),
                write_offset,
                &ItemNodeHeader {
                    lookup_pointer: item_header.lookup_pointer,
                    next_item_pointer: new_next,
                    hash_code: item_header.hash_code,
                },
            )?;
            core.file_mut()
                .write_at((write_offset + node::ITEM_NODE_HEADER_SIZE as i64) as u64, &payload)?;
            write_offset = new_next;
        }
        read_offset = next_read;
    }
    let new_eof = write_offset;

    core.journal_op(
        JournalOp::GrowLookupSection,
        copy_frontier_start,
        new_item_section_pointer,
        new_eof,
        |core| core.apply_grow_lookup_section(new_item_section_pointer, copy_frontier_start, new_eof),
    )?;

    core.journal_op(JournalOp::RebuildLookupTable, 0, 0, new_capacity, |core| {
        core.apply_rebuild_lookup_table(new_capacity)
    })
}

#[cfg(test)]
mod tests {
    use crate::stream::CacheOptions;
    use crate::table::{Core, Mode, OpenArgs};

    fn open_map(path: &std::path::Path) -> Core {
        Core::open(OpenArgs {
            path: path.to_path_buf(),
            mode: Mode::Map,
            read_only: false,
            create: true,
            signature: None,
            cache: CacheOptions::default(),
        })
        .unwrap()
    }

    #[test]
    fn grow_preserves_all_live_items_and_doubles_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = open_map(&dir.path().join("f.bin"));
        let old_capacity = core.capacity();

        let mut offsets = Vec::new();
        for i in 0..12i32 {
            let payload = i.to_le_bytes();
            let outcome = core.find(i, |_, _| Ok(false)).unwrap();
            assert!(!outcome.found());
            core.grow_if_needed().unwrap();
            let outcome = core.find(i, |_, _| Ok(false)).unwrap();
            let item_offset = core.append_item(outcome.lookup_pointer, i, &payload).unwrap();
            core.commit_set(outcome.lookup_pointer, item_offset, true).unwrap();
            offsets.push(i);
        }

        assert!(core.capacity() > old_capacity);
        assert_eq!(core.count(), 12);

        for i in offsets {
            let found = core
                .find(i, |file, item_offset| {
                    let header = crate::node::read_item_node_header(file, item_offset)?;
                    let mut payload = [0u8; 4];
                    file.read_at(
                        (item_offset + crate::node::ITEM_NODE_HEADER_SIZE as i64) as u64,
                        &mut payload,
                    )?;
                    Ok(header.hash_code == i && i32::from_le_bytes(payload) == i)
                })
                .unwrap();
            assert!(found.found(), "key {i} should still be reachable after grow");
        }
    }
}
