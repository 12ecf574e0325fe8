//! The extent I/O path (§4.6): turning a `Write`/`Read` call on an inode
//! into aligned, compressed, replicated, encrypted, checksummed bytes on
//! one or more [`cowfs_io::BlockDevice`]s, plus the erasure-coded stripe
//! variant of the same pipeline. Sits above `cowfs-alloc` (replicas are
//! drawn from its allocator) and `cowfs-txn` (the extent key and inode
//! size update commit as one transaction) per the dependency order in
//! §2 — nothing in `cowfs-btree`/`cowfs-journal`/`cowfs-txn`/`cowfs-alloc`
//! depends back on this crate.

pub mod align;
pub mod compress;
pub mod crypt;
pub mod read;
pub mod replica;
pub mod stripe;
pub mod write;

pub use crypt::EXTENT_KEY_LEN;
pub use stripe::StripeRegistry;
pub use write::{write_extent, ExtentIo, WrittenExtent};
