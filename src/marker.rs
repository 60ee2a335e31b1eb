//! The marker engine (§4.9): a scratch bit per lookup slot, present only in
//! set mode, used to implement the bulk set-algebra operations without
//! building an in-memory copy of either side. The primitives here are purely
//! mechanical (unmark/mark/query by slot); the actual algebra (union,
//! intersect, except, ...) is composed from them in [`crate::set`], which is
//! the only place that knows how to hash and compare a `K`.

use std::io;

use crate::node;
use crate::stream::CachedFile;
use crate::table::Core;

/// Clears every live slot's marker. Always the first step of a set-algebra
/// pass so stale markers from a previous operation can't leak in.
pub fn unmark_all(core: &mut Core) -> io::Result<()> {
    let capacity = core.capacity();
    let lookup_node_size = core.lookup_node_size();
    for index in 0..capacity {
        let slot_offset = node::lookup_slot_offset(index, lookup_node_size);
        node::write_lookup_marker(core.file_mut(), slot_offset, 0)?;
    }
    Ok(())
}

/// Finds the slot matching `hash_code`/`key_matches` and marks it if live.
/// Returns whether a live match was found.
pub fn try_mark(
    core: &mut Core,
    hash_code: i32,
    key_matches: impl FnMut(&mut CachedFile, i64) -> io::Result<bool>,
) -> io::Result<bool> {
    let outcome = core.find(hash_code, key_matches)?;
    if outcome.found() {
        node::write_lookup_marker(core.file_mut(), outcome.lookup_pointer as u64, 1)?;
    }
    Ok(outcome.found())
}

/// True iff every live slot is currently marked.
pub fn all_marked(core: &mut Core) -> io::Result<bool> {
    let capacity = core.capacity();
    let lookup_node_size = core.lookup_node_size();
    let item_section_pointer = core.item_section_pointer();
    for index in 0..capacity {
        let slot_offset = node::lookup_slot_offset(index, lookup_node_size);
        let value = node::read_lookup_item_pointer(core.file_mut(), slot_offset)?;
        if node::is_live(value, item_section_pointer) {
            let marker = node::read_lookup_marker(core.file_mut(), slot_offset)?;
            if marker == 0 {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Deletes every live, marked slot.
pub fn remove_marked(core: &mut Core) -> io::Result<()> {
    remove_where(core, true)
}

/// Deletes every live, unmarked slot.
pub fn remove_unmarked(core: &mut Core) -> io::Result<()> {
    remove_where(core, false)
}

fn remove_where(core: &mut Core, remove_if_marked: bool) -> io::Result<()> {
    let capacity = core.capacity();
    let lookup_node_size = core.lookup_node_size();

    let mut to_delete = Vec::new();
    for index in 0..capacity {
        let slot_offset = node::lookup_slot_offset(index, lookup_node_size);
        let item_section_pointer = core.item_section_pointer();
        let value = node::read_lookup_item_pointer(core.file_mut(), slot_offset)?;
        if node::is_live(value, item_section_pointer) {
            let marker = node::read_lookup_marker(core.file_mut(), slot_offset)?;
            if (marker != 0) == remove_if_marked {
                to_delete.push(slot_offset as i64);
            }
        }
    }

    for lookup_pointer in to_delete {
        core.commit_delete(lookup_pointer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::CacheOptions;
    use crate::table::{Mode, OpenArgs};

    fn open_set(path: &std::path::Path) -> Core {
        Core::open(OpenArgs {
            path: path.to_path_buf(),
            mode: Mode::Set,
            read_only: false,
            create: true,
            signature: None,
            cache: CacheOptions::default(),
        })
        .unwrap()
    }

    fn insert(core: &mut Core, i: i32) {
        let outcome = core.find(i, |_, _| Ok(false)).unwrap();
        let offset = core.append_item(outcome.lookup_pointer, i, &[]).unwrap();
        core.commit_set(outcome.lookup_pointer, offset, true).unwrap();
    }

    fn matches(i: i32) -> impl FnMut(&mut CachedFile, i64) -> io::Result<bool> {
        move |file, item_offset| {
            let header = node::read_item_node_header(file, item_offset)?;
            Ok(header.hash_code == i)
        }
    }

    #[test]
    fn mark_and_remove_unmarked_keeps_only_marked() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = open_set(&dir.path().join("f.bin"));
        for i in 0..5 {
            insert(&mut core, i);
        }
        unmark_all(&mut core).unwrap();
        for i in [1, 3] {
            assert!(try_mark(&mut core, i, matches(i)).unwrap());
        }
        assert!(!all_marked(&mut core).unwrap());
        remove_unmarked(&mut core).unwrap();
        assert_eq!(core.count(), 2);
        for i in [1, 3] {
            assert!(core.find(i, matches(i)).unwrap().found());
        }
        for i in [0, 2, 4] {
            assert!(!core.find(i, matches(i)).unwrap().found());
        }
    }
}
