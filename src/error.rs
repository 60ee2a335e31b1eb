use std::fmt;

/// Errors returned by every public operation on [`crate::map::FileMap`] and
/// [`crate::set::FileSet`].
///
/// Two strata are distinguished, matching the crash-recovery design: contract
/// errors the caller could have avoided (bad arguments, read-only violation,
/// missing/duplicate key) and recovery conditions the engine could not avoid
/// (a dirty journal on a read-only open, a truncated file).
#[derive(Debug)]
pub enum Error {
    /// Propagated I/O failure from the underlying file.
    Io(std::io::Error),

    /// A path, signature, or other caller-supplied argument was invalid.
    InvalidArgument(String),

    /// `get_or_err`/indexer-style lookup found no item for the key.
    KeyNotFound,

    /// `try_insert` found the key already present.
    DuplicateKey,

    /// A mutating call was made on a handle opened with [`crate::options::OpenOptions::read_only`].
    ReadOnly,

    /// A signature longer than 16 bytes was supplied.
    SignatureTooLarge { len: usize },

    /// The journal was left in a non-`None` state and recovery could not
    /// proceed (read-only open, or a second dirty journal after a replay).
    JournalCorrupt,

    /// A value did not fit the element serializer contract (the one
    /// remaining dynamic case: sequence element construction, see
    /// [`crate::serializer::Codec`]).
    Unsupported(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::DuplicateKey => write!(f, "key already present"),
            Error::ReadOnly => write!(f, "handle is read-only"),
            Error::SignatureTooLarge { len } => {
                write!(f, "signature of {len} bytes exceeds the 16-byte maximum")
            }
            Error::JournalCorrupt => write!(f, "journal is dirty and could not be recovered"),
            Error::Unsupported(msg) => write!(f, "unsupported element shape: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::InvalidArgument(msg) => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)
            }
            Error::KeyNotFound => {
                std::io::Error::new(std::io::ErrorKind::NotFound, "key not found")
            }
            Error::DuplicateKey => {
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "key already present")
            }
            Error::ReadOnly => std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "handle is read-only",
            ),
            Error::SignatureTooLarge { len } => std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("signature of {len} bytes exceeds the 16-byte maximum"),
            ),
            Error::JournalCorrupt => std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "journal is dirty and could not be recovered",
            ),
            Error::Unsupported(msg) => std::io::Error::new(std::io::ErrorKind::Unsupported, msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
