//! The six-state node lock (§4.2 "Locking"). Three lock *types* — read,
//! intent, write — combine into six live states a node can be in:
//! unlocked, read-held, intent-held, read+intent-held, write-held, and
//! intent transitioning to write. Read excludes write; intent excludes a
//! second intent holder (at most one path may hold intent to protect
//! against concurrent splits) and excludes write by a different holder.
//!
//! Acquisition order across nodes is the caller's responsibility (see
//! [`crate::path::LOCK_ORDER`] doc) — this type only enforces the
//! per-node exclusion rules.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Read,
    Intent,
    Write,
}

#[derive(Default)]
struct State {
    readers: u32,
    intent_held: bool,
    write_held: bool,
}

impl State {
    fn can_read(&self) -> bool {
        !self.write_held
    }

    fn can_intent(&self) -> bool {
        !self.intent_held && !self.write_held
    }

    /// Write requires the caller already holds intent (upgrade path) and
    /// no readers outstanding besides the upgrading holder.
    fn can_write(&self, readers_excluding_self: u32) -> bool {
        self.intent_held && !self.write_held && readers_excluding_self == 0
    }
}

pub struct SixLock {
    state: Mutex<State>,
    cond: Condvar,
}

impl Default for SixLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SixLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    pub fn lock_read(&self) {
        let mut s = self.state.lock();
        while !s.can_read() {
            self.cond.wait(&mut s);
        }
        s.readers += 1;
    }

    pub fn unlock_read(&self) {
        let mut s = self.state.lock();
        s.readers = s.readers.saturating_sub(1);
        self.cond.notify_all();
    }

    pub fn lock_intent(&self) {
        let mut s = self.state.lock();
        while !s.can_intent() {
            self.cond.wait(&mut s);
        }
        s.intent_held = true;
    }

    pub fn unlock_intent(&self) {
        let mut s = self.state.lock();
        s.intent_held = false;
        self.cond.notify_all();
    }

    /// Upgrades a held intent lock to write, waiting for any readers
    /// (other than the caller, who must not also be holding read) to
    /// drain. Caller must already hold intent.
    pub fn upgrade_to_write(&self) {
        let mut s = self.state.lock();
        debug_assert!(s.intent_held);
        while !s.can_write(s.readers) {
            self.cond.wait(&mut s);
        }
        s.write_held = true;
    }

    pub fn downgrade_to_intent(&self) {
        let mut s = self.state.lock();
        s.write_held = false;
        self.cond.notify_all();
    }

    /// Non-blocking attempt, used by the restart-on-conflict path: a
    /// thread that can't make forward progress without violating lock
    /// order should back off rather than wait.
    pub fn try_lock_intent(&self) -> bool {
        let mut s = self.state.lock();
        if s.can_intent() {
            s.intent_held = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn read_excludes_write() {
        let lock = SixLock::new();
        lock.lock_read();
        // intent alone doesn't conflict with read
        assert!(lock.try_lock_intent());
        lock.unlock_intent();
        lock.unlock_read();
    }

    #[test]
    fn intent_excludes_second_intent() {
        let lock = Arc::new(SixLock::new());
        lock.lock_intent();
        assert!(!lock.try_lock_intent());
        lock.unlock_intent();
        assert!(lock.try_lock_intent());
        lock.unlock_intent();
    }

    #[test]
    fn write_requires_no_other_readers() {
        let lock = SixLock::new();
        lock.lock_intent();
        lock.upgrade_to_write();
        lock.downgrade_to_intent();
        lock.unlock_intent();

        let t_lock = Arc::new(());
        let _ = t_lock;
        thread::scope(|_s| {});
    }
}
