use core::fmt;

use crate::{BtreeId, Position};

/// Errors shared across every layer of the core, per §7's taxonomy.
/// Individual crates (`cowfs-btree`, `cowfs-txn`, …) wrap this in their
/// own `Error` where they need variants of their own, the way the
/// teacher's `file-io`/`vsfs` crates each layer a thin `Error` over
/// `io::IoError`.
#[derive(Debug)]
pub enum Error {
    // --- superblock (§4.1) ---
    BadMagic,
    BadChecksum,
    UnknownRequiredFeature(u64),
    Truncated,

    // --- transaction layer (§4.3) ---
    TransactionRestart(RestartReason),
    NoSpace,
    ReadOnly,

    // --- corruption (§7) ---
    Corruption {
        btree_id: Option<BtreeId>,
        position: Option<Position>,
        detail: &'static str,
    },
    ChecksumMismatch,
    CorruptMetadata,
    UnrecoverableRead,

    // --- misc ---
    Io(cowfs_io::IoError),
    NotImplemented(&'static str),
    InvalidArgument(&'static str),
    NotFound,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    LockOrdering,
    MemoryPressure,
    OptimisticReadConflict,
    JournalFull,
}

impl Error {
    pub fn corruption(btree_id: BtreeId, position: Position, detail: &'static str) -> Self {
        Error::Corruption {
            btree_id: Some(btree_id),
            position: Some(position),
            detail,
        }
    }

    pub fn is_restart(&self) -> bool {
        matches!(self, Error::TransactionRestart(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic => write!(f, "bad magic"),
            Error::BadChecksum => write!(f, "bad checksum"),
            Error::UnknownRequiredFeature(bit) => write!(f, "unknown required feature bit {bit}"),
            Error::Truncated => write!(f, "truncated record"),
            Error::TransactionRestart(reason) => write!(f, "transaction restart: {reason:?}"),
            Error::NoSpace => write!(f, "no space left on device"),
            Error::ReadOnly => write!(f, "filesystem is read-only"),
            Error::Corruption {
                btree_id,
                position,
                detail,
            } => {
                write!(f, "corruption: {detail}")?;
                if let Some(id) = btree_id {
                    write!(f, " btree={id:?}")?;
                }
                if let Some(pos) = position {
                    write!(f, " pos={pos:?}")?;
                }
                Ok(())
            }
            Error::ChecksumMismatch => write!(f, "checksum mismatch"),
            Error::CorruptMetadata => write!(f, "corrupt metadata"),
            Error::UnrecoverableRead => write!(f, "unrecoverable read: no replica succeeded"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::NotImplemented(what) => write!(f, "not implemented: {what}"),
            Error::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Error::NotFound => write!(f, "not found"),
            Error::AlreadyExists => write!(f, "already exists"),
        }
    }
}

impl std::error::Error for Error {}

impl From<cowfs_io::IoError> for Error {
    fn from(e: cowfs_io::IoError) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
