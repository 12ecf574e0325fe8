//! A single staged change within a transaction attempt (§4.3 step 3:
//! "each update records `(btree_id, old_key_snapshot, new_key)`").

use cowfs_types::{BtreeId, Key};

#[derive(Debug, Clone)]
pub struct StagedUpdate {
    pub btree_id: BtreeId,
    /// The value read back at `begin`/stage time, or `None` if the
    /// position was empty. Re-checked byte-for-byte at commit (§4.3 step
    /// 5b) against whatever is live then; any difference — including the
    /// position having gone from empty to occupied or vice versa —
    /// forces a restart.
    pub old_snapshot: Option<Key>,
    pub new_key: Key,
}
