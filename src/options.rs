//! User-facing configuration for opening or creating a table file, in the
//! teacher's `CreateOptions` builder style: an explicit, immutable record
//! constructed through chained setter methods rather than a constructor with
//! a long positional parameter list.

use std::path::PathBuf;

use crate::stream::CacheOptions;
use crate::table::{Mode, OpenArgs};

/// How to open a [`crate::map::FileMap`] or [`crate::set::FileSet`].
///
/// Defaults match the specification's defaults: read-write, create if
/// missing, the container's default signature, and a 64 KiB page cache.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    read_only: bool,
    create: bool,
    signature: Option<[u8; 16]>,
    cache_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            read_only: false,
            create: true,
            signature: None,
            cache_size: CacheOptions::default().cache_size,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open for shared, read-only access. Refuses to run recovery: a dirty
    /// journal makes the open fail instead (§4.6).
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Create the file if it does not already exist.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Override the 16-byte signature stamped in the header, e.g. to pin a
    /// format version distinct from the container's built-in default.
    pub fn signature(mut self, signature: [u8; 16]) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Byte budget for the page cache (see [`CacheOptions`]).
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub(crate) fn into_args(self, path: PathBuf, mode: Mode) -> OpenArgs {
        OpenArgs {
            path,
            mode,
            read_only: self.read_only,
            create: self.create,
            signature: self.signature,
            cache: CacheOptions {
                cache_size: self.cache_size,
            },
        }
    }
}
