//! The journal (§4.4): an append-only ring of checksummed entries that
//! makes B-tree updates durable before they're reflected in the
//! in-memory nodes, plus the blacklist of quarantined sequences and the
//! replay path mount uses to bring those nodes back up to date. Sits
//! directly on `cowfs-io`/`cowfs-types`, ahead of `cowfs-btree` in the
//! dependency order in §2 — the B-tree engine knows nothing about the
//! journal; the transaction layer is what drives both.

pub mod blacklist;
pub mod entry;
pub mod ring;

pub use blacklist::Blacklist;
pub use entry::{EntryFlags, JournalEntry, UpdateRecord, ENTRY_MAGIC};
pub use ring::{Journal, JournalRegion};
