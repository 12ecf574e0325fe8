//! The scratch arena a transaction attempt allocates at `begin` (§4.3
//! step 1): a bump buffer the commit path encodes staged updates into
//! before handing them to the journal, reused across retries of the
//! same attempt so a long-lived transaction doesn't reallocate on every
//! restart. Growing past `cap` is treated as the "memory pressure"
//! restart reason §4.3 names rather than growing unbounded.

use cowfs_types::{Error, Result};

pub struct Arena {
    buf: Vec<u8>,
    cap: usize,
}

impl Arena {
    pub fn new(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap.min(4096)), cap }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        if self.buf.len() + data.len() > self.cap {
            return Err(Error::TransactionRestart(cowfs_types::RestartReason::MemoryPressure));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
