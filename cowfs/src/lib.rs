//! The top-level facade crate (§STRUCTURE): the `Filesystem` handle
//! tying the superblock, B-tree engine, journal, transaction, allocator,
//! and extent I/O crates together, plus the bulk drivers, background
//! workers, and §6.2 control plane built on top of it.

pub mod bulk;
pub mod control_plane;
pub mod filesystem;
pub mod workers;
pub mod xattr;

pub use control_plane::{ControlPlane, DataOp, DiskFlags, ProgressUpdate, Range};
pub use filesystem::{DevUsage, Filesystem, FsUsage};
pub use workers::WorkerHandles;
