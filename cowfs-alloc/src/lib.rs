//! The allocator (§4.5): per-device bucket state in `alloc`, free-space
//! and invalidation indices derived from it, `Allocate`/`Invalidate`,
//! space reservation, and the discard/copygc background jobs. Depends
//! on `cowfs-txn` per the dependency order in §2 — `cowfs-extent`
//! builds on this crate rather than the reverse.

pub mod allocator;
pub mod bucket_addr;
pub mod copygc;
pub mod device_config;
pub mod discard;
pub mod freespace_init;
pub mod reservation;

pub use allocator::Allocator;
pub use bucket_addr::BucketAddr;
pub use copygc::{find_candidates, CopygcCandidate};
pub use device_config::DeviceConfig;
pub use discard::run_discard_pass;
pub use freespace_init::{run_freespace_init, FreespaceInitStats};
pub use reservation::{DiskReservation, ReservationPool};
