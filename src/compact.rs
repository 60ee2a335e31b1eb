//! Compaction (§4.8): a two-pointer fusion pass over the item section that
//! slides every live item down over the orphan gaps left by overwrites and
//! deletes, then truncates the file if the section now ends in reclaimed
//! space. Unlike grow, compaction never changes capacity or the lookup
//! section's size — only the item section shrinks.

use std::io;

use crate::journal::JournalOp;
use crate::node;
use crate::table::Core;

#[tracing::instrument(level = "info", skip(core))]
pub fn compact(core: &mut Core) -> io::Result<()> {
    let item_section_pointer = core.item_section_start();
    let end = core.end_of_file_pointer();

    let mut read = item_section_pointer;
    let mut write = item_section_pointer;

    while read < end {
        let item_header = node::read_item_node_header(core.file_mut(), read)?;
        let next_read = item_header.next_item_pointer;

        if core.is_item_live(read, item_header.lookup_pointer)? {
            let payload_len = (next_read - read - node::ITEM_NODE_HEADER_SIZE as i64) as usize;
            if write != read {
                let mut payload = vec![0u8; payload_len];
                core.file_mut()
                    .read_at((read + node::ITEM_NODE_HEADER_SIZE as i64) as u64, &mut payload)?;
                let new_next = write + node::ITEM_NODE_HEADER_SIZE as i64 + payload_len as i64;

                // Raw transplant: nothing references `write` yet, so a crash
                // here just leaves stray bytes past the (still-correct) old
                // item, harmless.
                node::write_item_node_header(
                    core.file_mut(),
                    write,
                    &node::ItemNodeHeader {
                        lookup_pointer: item_header.lookup_pointer,
                        next_item_pointer: new_next,
                        hash_code: item_header.hash_code,
                    },
                )?;
                core.file_mut()
                    .write_at((write + node::ITEM_NODE_HEADER_SIZE as i64) as u64, &payload)?;

                let lookup_pointer = item_header.lookup_pointer;
                core.journal_op(JournalOp::WriteItemNodePointers, lookup_pointer, write, new_next, |core| {
                    core.apply_write_item_node_pointers(lookup_pointer, write, new_next)
                })?;

                write = new_next;
            } else {
                write = next_read;
            }
        }

        read = next_read;
    }

    if write < end {
        tracing::debug!(old_end = end, new_end = write, "truncating after compaction");
        core.journal_op(JournalOp::Truncate, 0, write, 0, |core| core.apply_truncate(write))?;
    }

    core.reset_fragmentation();
    Ok(())
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
    fn compact_reclaims_orphans_and_keeps_live_items_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = open_map(&dir.path().join("f.bin"));

        for i in 0..5i32 {
            let payload = i.to_le_bytes();
            let outcome = core.find(i, |_, _| Ok(false)).unwrap();
            let item_offset = core.append_item(outcome.lookup_pointer, i, &payload).unwrap();
            core.commit_set(outcome.lookup_pointer, item_offset, true).unwrap();
        }

        // Overwrite keys 1 and 3, orphaning their original item nodes.
        for i in [1, 3] {
            let payload = (i * 100).to_le_bytes();
            let outcome = core
                .find(i, |file, item_offset| {
                    let header = crate::node::read_item_node_header(file, item_offset)?;
                    Ok(header.hash_code == i)
                })
                .unwrap();
            assert!(outcome.found());
            let item_offset = core.append_item(outcome.lookup_pointer, i, &payload).unwrap();
            core.commit_set(outcome.lookup_pointer, item_offset, false).unwrap();
        }
        assert!(core.fragmentation_count() > 0);

        let eof_before = core.end_of_file_pointer();
        core.compact().unwrap();
        assert_eq!(core.fragmentation_count(), 0);
        assert!(core.end_of_file_pointer() <= eof_before);
        assert_eq!(core.count(), 5);

        for i in 0..5i32 {
            let expected = if i == 1 || i == 3 { i * 100 } else { i };
            let found = core
                .find(i, |file, item_offset| {
                    let header = crate::node::read_item_node_header(file, item_offset)?;
                    let mut payload = [0u8; 4];
                    file.read_at(
                        (item_offset + crate::node::ITEM_NODE_HEADER_SIZE as i64) as u64,
                        &mut payload,
                    )?;
                    Ok(header.hash_code == i && i32::from_le_bytes(payload) == expected)
                })
                .unwrap();
            assert!(found.found(), "key {i} should survive compaction with its latest value");
        }
    }
}
